use crate::error::{Result, Status};
use crate::log::Message;
use crate::transaction::{Data, Transaction};
use crate::util::FileData;

/// Callback invoked at transaction-level boundaries (request line seen,
/// headers complete, and so on).
pub type TxCallbackFn = fn(&mut Transaction) -> Result<()>;

/// Callback receiving body data for a transaction.
pub type DataCallbackFn = for<'a, 'b> fn(&'a mut Data<'b>) -> Result<()>;

/// Callback receiving extracted file data.
pub type FileDataCallbackFn = for<'a, 'b> fn(&'a mut FileData<'b>) -> Result<()>;

/// Callback receiving log messages.
pub type LogCallbackFn = fn(&Message) -> Result<()>;

macro_rules! hook_type {
    ($(#[$doc:meta])* $name:ident, $cbk:ty, $arg:ty) => {
        $(#[$doc])*
        #[derive(Clone, Default)]
        pub struct $name {
            callbacks: Vec<$cbk>,
        }

        impl $name {
            /// Create a new hook with no registered callbacks.
            pub fn new() -> Self {
                Self {
                    callbacks: Vec::new(),
                }
            }

            /// Register a callback. Registration order is invocation order.
            pub fn register(&mut self, cbk: $cbk) {
                self.callbacks.push(cbk);
            }

            /// Run all callbacks in registration order.
            ///
            /// `Declined` results are skipped over; the first `Stop` or error
            /// aborts the run and is propagated to the caller.
            pub fn run_all(&self, arg: $arg) -> Result<()> {
                for cbk in &self.callbacks {
                    match cbk(arg) {
                        Ok(()) | Err(Status::Declined) => {}
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }

            /// Run callbacks until one produces a non-`Declined` result,
            /// which becomes the result of the whole run. If every callback
            /// declines, `Declined` is returned.
            pub fn run_one(&self, arg: $arg) -> Result<()> {
                for cbk in &self.callbacks {
                    match cbk(arg) {
                        Err(Status::Declined) => {}
                        other => return other,
                    }
                }
                Err(Status::Declined)
            }

            /// Number of registered callbacks.
            pub fn len(&self) -> usize {
                self.callbacks.len()
            }

            /// True when no callbacks are registered.
            pub fn is_empty(&self) -> bool {
                self.callbacks.is_empty()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("callbacks", &self.callbacks.len())
                    .finish()
            }
        }
    };
}

hook_type!(
    /// Ordered list of transaction callbacks.
    TxHook,
    TxCallbackFn,
    &mut Transaction
);
hook_type!(
    /// Ordered list of body-data callbacks.
    DataHook,
    DataCallbackFn,
    &mut Data<'_>
);
hook_type!(
    /// Ordered list of file-data callbacks.
    FileDataHook,
    FileDataCallbackFn,
    &mut FileData<'_>
);
hook_type!(
    /// Ordered list of log callbacks.
    LogHook,
    LogCallbackFn,
    &Message
);

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::bstr::Bstr;

    fn count_cb(tx: &mut Transaction) -> Result<()> {
        tx.request_ignored_lines += 1;
        Ok(())
    }

    fn declined_cb(_tx: &mut Transaction) -> Result<()> {
        Err(Status::Declined)
    }

    fn stop_cb(tx: &mut Transaction) -> Result<()> {
        tx.request_ignored_lines += 10;
        Err(Status::Stop)
    }

    fn winner_cb(tx: &mut Transaction) -> Result<()> {
        tx.request_method = Some(Bstr::from("GET"));
        Ok(())
    }

    #[test]
    fn RunAllStopsOnStop() {
        let mut hook = TxHook::new();
        hook.register(count_cb);
        hook.register(stop_cb);
        hook.register(count_cb);

        let mut tx = Transaction::for_tests();
        assert_eq!(hook.run_all(&mut tx), Err(Status::Stop));
        // The callback after the stop never ran.
        assert_eq!(tx.request_ignored_lines, 11);
    }

    #[test]
    fn RunAllSkipsDeclined() {
        let mut hook = TxHook::new();
        hook.register(declined_cb);
        hook.register(count_cb);

        let mut tx = Transaction::for_tests();
        assert!(hook.run_all(&mut tx).is_ok());
        assert_eq!(tx.request_ignored_lines, 1);
    }

    #[test]
    fn RunOneFirstNonDeclinedWins() {
        let mut hook = TxHook::new();
        hook.register(declined_cb);
        hook.register(winner_cb);
        hook.register(stop_cb);

        let mut tx = Transaction::for_tests();
        assert!(hook.run_one(&mut tx).is_ok());
        assert_eq!(tx.request_method.as_ref().unwrap(), &"GET");
        // The stop callback after the winner never ran.
        assert_eq!(tx.request_ignored_lines, 0);
    }

    #[test]
    fn RunOneAllDeclined() {
        let mut hook = TxHook::new();
        hook.register(declined_cb);
        let mut tx = Transaction::for_tests();
        assert_eq!(hook.run_one(&mut tx), Err(Status::Declined));
    }
}
