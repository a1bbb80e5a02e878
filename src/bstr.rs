use bstr::{BString, ByteSlice};
use core::cmp::Ordering;
use std::ops::{Deref, DerefMut};

/// Owned byte string used for all protocol data.
///
/// HTTP field values are binary safe, so nothing in here assumes valid
/// UTF-8. Comparisons come in case-sensitive, case-insensitive, and
/// case-insensitive-skipping-NULs variants; the last one exists because
/// some servers accept NUL bytes embedded in header names.
#[derive(Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Bstr {
    s: BString,
}

impl Default for Bstr {
    fn default() -> Self {
        Self::new()
    }
}

impl Bstr {
    /// Make a new owned Bstr.
    pub fn new() -> Self {
        Bstr {
            s: BString::from(Vec::new()),
        }
    }

    /// Make a new owned Bstr with given capacity.
    pub fn with_capacity(len: usize) -> Self {
        Bstr {
            s: BString::from(Vec::with_capacity(len)),
        }
    }

    /// Split the Bstr on the given byte string, yielding subslices.
    pub fn split_str_collect<'b, B: ?Sized + AsRef<[u8]>>(
        &'b self,
        splitter: &'b B,
    ) -> Vec<&'b [u8]> {
        self.s.split_str(splitter.as_ref()).collect()
    }

    /// Compare this Bstr with the given slice.
    pub fn cmp_slice<B: AsRef<[u8]>>(&self, other: B) -> Ordering {
        self.as_slice().cmp(other.as_ref())
    }

    /// Return true if self is equal to other.
    pub fn eq_slice<B: AsRef<[u8]>>(&self, other: B) -> bool {
        self.cmp_slice(other) == Ordering::Equal
    }

    /// Compare bytes in self with other, ignoring ascii case.
    pub fn cmp_nocase<B: AsRef<[u8]>>(&self, other: B) -> Ordering {
        let lhs = self.as_slice();
        let rhs = other.as_ref();
        let len = std::cmp::min(lhs.len(), rhs.len());
        for i in 0..len {
            let ord = lhs[i]
                .to_ascii_lowercase()
                .cmp(&rhs[i].to_ascii_lowercase());
            if ord != Ordering::Equal {
                return ord;
            }
        }
        lhs.len().cmp(&rhs.len())
    }

    /// Return true if self is equal to other, ignoring ascii case.
    pub fn eq_nocase<B: AsRef<[u8]>>(&self, other: B) -> bool {
        self.cmp_nocase(other) == Ordering::Equal
    }

    /// Compare self with other, ignoring ascii case and skipping any NUL
    /// bytes found in self.
    pub fn cmp_nocase_nozero<B: AsRef<[u8]>>(&self, other: B) -> Ordering {
        let lhs: Vec<u8> = self.iter().copied().filter(|&b| b != 0).collect();
        let rhs = other.as_ref();
        let len = std::cmp::min(lhs.len(), rhs.len());
        for i in 0..len {
            let ord = lhs[i]
                .to_ascii_lowercase()
                .cmp(&rhs[i].to_ascii_lowercase());
            if ord != Ordering::Equal {
                return ord;
            }
        }
        lhs.len().cmp(&rhs.len())
    }

    /// Extend this Bstr with the given slice.
    pub fn add<B: AsRef<[u8]>>(&mut self, src: B) {
        self.extend_from_slice(src.as_ref())
    }

    /// Return this Bstr as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        self.s.as_slice()
    }

    /// Find the index of the given slice.
    pub fn index_of<B: AsRef<[u8]>>(&self, needle: B) -> Option<usize> {
        self.as_slice().find(needle.as_ref())
    }

    /// Find the index of the given slice, ignoring ascii case.
    pub fn index_of_nocase<B: AsRef<[u8]>>(&self, needle: B) -> Option<usize> {
        let haystack = self.as_slice().to_ascii_lowercase();
        let needle = needle.as_ref().to_ascii_lowercase();
        haystack.find(needle)
    }

    /// Find the index of the given slice, ignoring ascii case and NUL bytes
    /// in self.
    pub fn index_of_nocase_nozero<B: AsRef<[u8]>>(&self, needle: B) -> Option<usize> {
        let haystack: Vec<u8> = self
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .map(|b| b.to_ascii_lowercase())
            .collect();
        let needle = needle.as_ref().to_ascii_lowercase();
        haystack.find(needle)
    }

    /// Return true if this Bstr starts with the given slice.
    pub fn starts_with<B: AsRef<[u8]>>(&self, prefix: B) -> bool {
        self.as_slice().starts_with(prefix.as_ref())
    }

    /// Return true if this Bstr starts with the given slice, ignoring ascii case.
    pub fn starts_with_nocase<B: AsRef<[u8]>>(&self, prefix: B) -> bool {
        let prefix = prefix.as_ref();
        if self.len() < prefix.len() {
            return false;
        }
        self.as_slice()[..prefix.len()].eq_ignore_ascii_case(prefix)
    }
}

impl From<&[u8]> for Bstr {
    fn from(src: &[u8]) -> Self {
        Bstr {
            s: BString::from(src),
        }
    }
}

impl From<&str> for Bstr {
    fn from(src: &str) -> Self {
        src.as_bytes().into()
    }
}

impl From<Vec<u8>> for Bstr {
    fn from(src: Vec<u8>) -> Self {
        Bstr {
            s: BString::from(src),
        }
    }
}

impl Deref for Bstr {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.s
    }
}

impl DerefMut for Bstr {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.s
    }
}

impl AsRef<[u8]> for Bstr {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq<&str> for Bstr {
    fn eq(&self, rhs: &&str) -> bool {
        self.as_slice() == rhs.as_bytes()
    }
}

impl PartialEq<[u8]> for Bstr {
    fn eq(&self, rhs: &[u8]) -> bool {
        self.as_slice() == rhs
    }
}

impl PartialEq<&[u8]> for Bstr {
    fn eq(&self, rhs: &&[u8]) -> bool {
        self.as_slice() == *rhs
    }
}
