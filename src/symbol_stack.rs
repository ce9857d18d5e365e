//! Thread-local symbol stack queried by `SetSymbolDuringMethodCall` and by
//! host code deciding whether it is being re-entered from inside a hook —
//! §4.8.
//!
//! The stack is process-wide in the sense that every thread can use it,
//! but each thread sees only the symbols it pushed itself: a hook running
//! on the classloader's own thread must not observe symbols pushed by a
//! concurrent transform on another thread, matching the synchronous,
//! caller's-thread execution model in §5.

use std::cell::RefCell;

thread_local! {
    static STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Pushes `symbol` onto the calling thread's stack.
pub fn push(symbol: impl Into<String>) {
    STACK.with(|cell| cell.borrow_mut().push(symbol.into()));
}

/// Pops the most recently pushed symbol off the calling thread's stack, if any.
pub fn pop() -> Option<String> {
    STACK.with(|cell| cell.borrow_mut().pop())
}

/// Number of symbols currently on the calling thread's stack.
pub fn size() -> usize {
    STACK.with(|cell| cell.borrow().len())
}

/// `true` if the calling thread's stack has nothing on it.
pub fn is_empty() -> bool {
    size() == 0
}

/// `true` if `symbol` appears anywhere on the calling thread's stack.
pub fn has_symbol(symbol: &str) -> bool {
    STACK.with(|cell| cell.borrow().iter().any(|s| s == symbol))
}

/// `true` if the top of the calling thread's stack is `symbol` — used to
/// detect direct (non-nested) re-entrancy from inside a just-entered hook.
pub fn has_tail(symbol: &str) -> bool {
    STACK.with(|cell| cell.borrow().last().is_some_and(|s| s == symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trips_and_tracks_size() {
        assert_eq!(size(), 0);
        push("a");
        push("b");
        assert_eq!(size(), 2);
        assert!(has_symbol("a"));
        assert!(has_tail("b"));
        assert!(!has_tail("a"));
        assert_eq!(pop(), Some("b".to_string()));
        assert_eq!(pop(), Some("a".to_string()));
        assert_eq!(pop(), None);
        assert!(is_empty());
    }

    #[test]
    fn threads_do_not_share_stacks() {
        push("only-on-this-thread");
        let seen_elsewhere = std::thread::spawn(has_symbol_check).join().unwrap();
        assert!(!seen_elsewhere);
        assert!(has_symbol("only-on-this-thread"));
        pop();
    }

    fn has_symbol_check() -> bool {
        has_symbol("only-on-this-thread")
    }
}
