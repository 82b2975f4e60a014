//! The filter contract: a caller-supplied object that inspects and rewrites
//! one direction's committed byte stream.

use crate::instruction::Decision;
use crate::sockbuf::Placeholder;
use std::fmt::Debug;

/// A driven object that publishes one [`Decision`] at a time and is
/// re-entered when the engine has assembled bytes matching that decision's
/// instruction.
///
/// `enqueue` lets `run` reserve a transmission slot on the *opposite*
/// direction's write queue without the filter needing to know anything
/// about socket types — the engine binds it to the partner `SockBuf`'s
/// placeholder queue for the duration of the call.
pub trait Filter: Debug {
    /// Called once at loop entry to establish the initial instruction.
    fn setup_first_instruction(&mut self);

    /// Pure observation: the same decision is returned on successive calls
    /// until the engine commits bytes and re-enters `run`.
    fn current_decision(&self) -> Decision;

    /// Called after the engine has appended `uncommitted.len() - new_data_offset`
    /// new bytes to `uncommitted`, satisfying the current instruction's
    /// window (or because the direction disconnected).
    ///
    /// May edit `uncommitted` in place, enqueue placeholders via `enqueue`,
    /// and must choose the next decision (observable afterwards via
    /// `current_decision`).
    ///
    /// If `disconnected` is true, the engine asserts the resulting
    /// instruction is `Instruction::QuitFilter`.
    fn run(
        &mut self,
        uncommitted: &mut Vec<u8>,
        new_data_offset: usize,
        read_so_far: usize,
        disconnected: bool,
        enqueue: &mut dyn FnMut(Placeholder),
    );
}

/// A filter that immediately quits and never reads again.
///
/// For a direction with genuinely nothing left to do — paired with an
/// invalid `SockBuf`, or a caller that only wants one direction of a pair
/// active at all.
#[derive(Debug, Default)]
pub struct DeadFilter;

impl Filter for DeadFilter {
    fn setup_first_instruction(&mut self) {}

    fn current_decision(&self) -> Decision {
        Decision::quit()
    }

    fn run(
        &mut self,
        _uncommitted: &mut Vec<u8>,
        _new_data_offset: usize,
        _read_so_far: usize,
        _disconnected: bool,
        _enqueue: &mut dyn FnMut(Placeholder),
    ) {
        // Already at QuitFilter; nothing to do.
    }
}

/// A filter that relays every byte it sees to the opposite direction,
/// unexamined, and quits once its direction disconnects.
///
/// Used by [`crate::engine::unidirectional_proxy`], which attaches one to
/// each direction to get a plain byte copy with no framing logic at all.
#[derive(Debug, Default)]
pub struct PassthroughFilter {
    quit: bool,
}

impl Filter for PassthroughFilter {
    fn setup_first_instruction(&mut self) {}

    fn current_decision(&self) -> Decision {
        if self.quit {
            Decision::quit()
        } else {
            Decision::new(crate::instruction::Instruction::BytesUnknown, 0)
        }
    }

    fn run(
        &mut self,
        uncommitted: &mut Vec<u8>,
        new_data_offset: usize,
        _read_so_far: usize,
        disconnected: bool,
        enqueue: &mut dyn FnMut(Placeholder),
    ) {
        if disconnected {
            self.quit = true;
            return;
        }
        if uncommitted.len() > new_data_offset {
            let fresh = uncommitted.split_off(new_data_offset);
            enqueue(Placeholder::known(fresh));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_filter_quits_immediately() {
        let mut f = DeadFilter;
        f.setup_first_instruction();
        assert!(f.current_decision().instruction.is_quit());
    }

    #[test]
    fn passthrough_filter_relays_then_quits_on_disconnect() {
        let mut f = PassthroughFilter::default();
        f.setup_first_instruction();
        assert!(!f.current_decision().instruction.is_quit());

        let mut uncommitted = vec![1, 2, 3];
        let forwarded = std::cell::RefCell::new(Vec::new());
        let mut enqueue = |p: Placeholder| forwarded.borrow_mut().push(p);
        f.run(&mut uncommitted, 0, 3, false, &mut enqueue);
        assert!(uncommitted.is_empty());
        assert_eq!(forwarded.borrow().len(), 1);
        assert!(!f.current_decision().instruction.is_quit());

        f.run(&mut uncommitted, 0, 3, true, &mut enqueue);
        assert!(f.current_decision().instruction.is_quit());
    }
}
