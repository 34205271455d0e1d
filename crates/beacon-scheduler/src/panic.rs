//! Panic bookkeeping for the dispatch recovery boundary.
//!
//! `catch_unwind` only hands back the payload, so a process-wide hook stashes
//! the backtrace of the most recent panic in a thread local. The boundary
//! runs on the thread that panicked and picks it up right after unwinding.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic;
use std::sync::Once;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install the capturing hook once per process, chaining to the previous hook.
pub(crate) fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let bt = Backtrace::force_capture();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(bt));
            previous(info);
        }));
    });
}

/// Backtrace recorded by the most recent panic on this thread.
pub(crate) fn take_backtrace() -> Option<Backtrace> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_from_str_and_string_payloads() {
        let p: Box<dyn Any + Send> = Box::new("static msg");
        assert_eq!(panic_message(p.as_ref()), "static msg");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned msg"));
        assert_eq!(panic_message(p.as_ref()), "owned msg");
        let p: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(p.as_ref()), "non-string panic payload");
    }

    #[test]
    fn hook_records_backtrace_for_caught_panic() {
        install_hook();
        let _ = take_backtrace();
        let caught = panic::catch_unwind(|| panic!("kaboom"));
        assert!(caught.is_err());
        assert!(take_backtrace().is_some());
        assert!(take_backtrace().is_none());
    }
}
