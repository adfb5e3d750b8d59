// Test-only hook that fails the N+1th engine write on the current thread.
use std::cell::Cell;

use crate::core::error::{Error, ErrorKind};

thread_local! {
    static REMAINING: Cell<Option<usize>> = const { Cell::new(None) };
}

pub(crate) fn fail_after(writes: usize) {
    REMAINING.with(|remaining| remaining.set(Some(writes)));
}

pub(crate) fn hit() -> Result<(), Error> {
    REMAINING.with(|remaining| match remaining.get() {
        None => Ok(()),
        Some(0) => {
            remaining.set(None);
            Err(Error::new(ErrorKind::TransactionFailed).with_message("injected write failure"))
        }
        Some(left) => {
            remaining.set(Some(left - 1));
            Ok(())
        }
    })
}
