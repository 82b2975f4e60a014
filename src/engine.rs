//! The proxy loop: couples two [`SockBuf`]s through a pair of [`Filter`]s,
//! driving reads, writes, and filter re-entry from a single `poll(2)` call
//! per iteration.
//!
//! Grounded on `SockPair.cpp`'s `doBidirectionalFilteredProxyCore`/`Ex` and
//! `doUnidirectionalProxyCore`/`filterHelper`. The "goto LTryAgain" restart
//! that recomputes both directions' intents whenever a filter's decision
//! commits bytes is expressed here as a bounded fixed-point loop
//! ([`settle_intents`]) rather than a jump back into the middle of a larger
//! function.

use crate::config::EngineConfig;
use crate::direction::{Direction, ALL_DIRECTIONS};
use crate::direction::PerDirection;
use crate::error::{ErrorClass, ProxyError, ProxyResult};
use crate::filter::{Filter, PassthroughFilter};
use crate::instruction::{Instruction, Knowable};
use crate::logging;
use crate::net::bounded_io::{recv_once, send_bounded};
use crate::net::readiness::{self, PollFd};
use crate::net::socket::ProxySocket;
use crate::sockbuf::SockBuf;
use std::time::Duration;

/// The two `SockBuf`s a proxy run mediates, paired so the engine can borrow
/// one direction's buffer together with its partner's (for placeholder
/// enqueueing) without a `HashMap` or runtime borrow check.
#[derive(Debug)]
pub struct ProxyPair<S: ProxySocket> {
    pub client: SockBuf<S>,
    pub server: SockBuf<S>,
}

impl<S: ProxySocket> ProxyPair<S> {
    pub fn new(client: SockBuf<S>, server: SockBuf<S>) -> Self {
        ProxyPair { client, server }
    }

    pub fn get(&self, which: Direction) -> &SockBuf<S> {
        match which {
            Direction::Client => &self.client,
            Direction::Server => &self.server,
        }
    }

    pub fn get_mut(&mut self, which: Direction) -> &mut SockBuf<S> {
        match which {
            Direction::Client => &mut self.client,
            Direction::Server => &mut self.server,
        }
    }

    /// `which`'s `SockBuf` together with its partner's, as two disjoint
    /// mutable borrows — used when a filter's `run` call needs to enqueue a
    /// placeholder on the opposite direction's write queue.
    fn split_mut(&mut self, which: Direction) -> (&mut SockBuf<S>, &mut SockBuf<S>) {
        match which {
            Direction::Client => (&mut self.client, &mut self.server),
            Direction::Server => (&mut self.server, &mut self.client),
        }
    }
}

/// The two filters driving a proxy run, borrowed for the run's duration.
pub struct FilterPair<'a> {
    pub client: &'a mut dyn Filter,
    pub server: &'a mut dyn Filter,
}

impl<'a> FilterPair<'a> {
    pub fn new(client: &'a mut dyn Filter, server: &'a mut dyn Filter) -> Self {
        FilterPair { client, server }
    }

    fn get(&self, which: Direction) -> &dyn Filter {
        match which {
            Direction::Client => &*self.client,
            Direction::Server => &*self.server,
        }
    }

    fn get_mut(&mut self, which: Direction) -> &mut dyn Filter {
        match which {
            Direction::Client => &mut *self.client,
            Direction::Server => &mut *self.server,
        }
    }
}

/// What [`bidirectional_filtered_proxy_core`] observed over its run.
#[derive(Debug)]
pub struct CoreOutcome {
    pub sent_so_far: PerDirection<usize>,
    pub socket_closed: PerDirection<bool>,
    pub read_a_zero: PerDirection<bool>,
    pub timed_out: bool,
}

/// Re-enters `filter` after the engine has appended new bytes (or detected a
/// disconnect) to `this.uncommitted_bytes`, then applies the resulting
/// commit.
///
/// `length` is captured before `run` is called, matching the original's
/// `filterHelper`: a filter that grows `uncommitted_bytes` during `run` (by
/// appending replacement content) commits against the pre-`run` length, not
/// the grown one.
fn filter_helper<S: ProxySocket>(
    this: &mut SockBuf<S>,
    other: &mut SockBuf<S>,
    filter: &mut dyn Filter,
    new_data_offset: usize,
    read_so_far: usize,
    disconnected: bool,
) {
    let length = this.uncommitted_bytes.len();
    let mut enqueue = |p| other.push_placeholder(p);
    filter.run(
        &mut this.uncommitted_bytes,
        new_data_offset,
        read_so_far,
        disconnected,
        &mut enqueue,
    );
    let decision = filter.current_decision();
    if disconnected {
        assert!(
            decision.instruction.is_quit(),
            "filter must publish QuitFilter once its direction has disconnected"
        );
    }
    if decision.commit_size > 0 {
        assert!(
            length >= decision.commit_size,
            "commit_size exceeds the uncommitted length recorded before run() was called"
        );
        this.uncommitted_bytes.drain(0..decision.commit_size);
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// One direction's contribution to an intent-settling pass: updates
/// `this`'s buffers per its filter's current instruction, re-entering the
/// filter if doing so grew `uncommitted_bytes`. Returns the direction's
/// `needToRead`/`needToWrite` and whether this pass grew its buffer (the
/// caller uses this to decide whether another pass is needed).
fn settle_one_direction<S: ProxySocket>(
    this: &mut SockBuf<S>,
    other: &mut SockBuf<S>,
    filter: &mut dyn Filter,
    read_a_zero: bool,
    read_so_far: &mut usize,
) -> (Knowable<usize>, usize, bool) {
    let need_to_write = this.known_write_len();
    let decision = filter.current_decision();

    if this.is_invalid() || read_a_zero || decision.instruction.is_quit() {
        return (Knowable::Known(0), need_to_write, false);
    }

    let buflen_initial = this.uncommitted_bytes.len();
    let need_to_read = match &decision.instruction {
        Instruction::UntilDelimiter { delimiter } => {
            match find_subslice(&this.unfiltered_bytes, delimiter) {
                Some(pos) => {
                    let cut = pos + delimiter.len();
                    let moved: Vec<u8> = this.unfiltered_bytes.drain(0..cut).collect();
                    this.uncommitted_bytes.extend_from_slice(&moved);
                    Knowable::Known(0)
                }
                None => Knowable::Unknown,
            }
        }
        Instruction::BytesExact { n } => {
            let n = *n;
            let buflen = this.uncommitted_bytes.len();
            let rawlen = this.unfiltered_bytes.len();
            if buflen + rawlen >= n {
                let diff = n - buflen;
                let moved: Vec<u8> = this.unfiltered_bytes.drain(0..diff).collect();
                this.uncommitted_bytes.extend_from_slice(&moved);
                Knowable::Known(0)
            } else {
                Knowable::Known(n - (buflen + rawlen))
            }
        }
        Instruction::BytesMax { n } => {
            let n = *n;
            let buflen = this.uncommitted_bytes.len();
            if n <= buflen {
                Knowable::Known(0)
            } else {
                let rawlen = this.unfiltered_bytes.len();
                if buflen + rawlen >= n {
                    let diff = n - buflen;
                    let moved: Vec<u8> = this.unfiltered_bytes.drain(0..diff).collect();
                    this.uncommitted_bytes.extend_from_slice(&moved);
                    Knowable::Known(0)
                } else {
                    this.uncommitted_bytes.append(&mut this.unfiltered_bytes);
                    let buflen = this.uncommitted_bytes.len();
                    Knowable::Known(n - buflen)
                }
            }
        }
        Instruction::BytesUnknown => {
            this.uncommitted_bytes.append(&mut this.unfiltered_bytes);
            Knowable::Unknown
        }
        Instruction::QuitFilter => unreachable!("quit is handled above"),
    };

    let grew = this.uncommitted_bytes.len() - buflen_initial;
    if grew > 0 {
        *read_so_far += grew;
        filter_helper(this, other, filter, buflen_initial, *read_so_far, false);
        (need_to_read, need_to_write, true)
    } else {
        (need_to_read, need_to_write, false)
    }
}

/// Recomputes both directions' `needToRead`/`needToWrite` to a fixed point:
/// whenever a direction's buffer grows and its filter commits, both
/// directions are recomputed again, since a commit can enqueue a
/// placeholder that changes the other direction's `needToWrite`.
fn settle_intents<S: ProxySocket>(
    pair: &mut ProxyPair<S>,
    filters: &mut FilterPair<'_>,
    read_a_zero: &PerDirection<bool>,
    read_so_far: &mut PerDirection<usize>,
) -> (PerDirection<Knowable<usize>>, PerDirection<usize>) {
    loop {
        let (client_buf, server_buf) = pair.split_mut(Direction::Client);
        let (c_ntr, c_ntw, c_grew) = settle_one_direction(
            client_buf,
            server_buf,
            filters.get_mut(Direction::Client),
            read_a_zero[Direction::Client],
            &mut read_so_far[Direction::Client],
        );

        let (server_buf, client_buf) = pair.split_mut(Direction::Server);
        let (s_ntr, s_ntw, s_grew) = settle_one_direction(
            server_buf,
            client_buf,
            filters.get_mut(Direction::Server),
            read_a_zero[Direction::Server],
            &mut read_so_far[Direction::Server],
        );

        if !c_grew && !s_grew {
            return (
                PerDirection::new(c_ntr, s_ntr),
                PerDirection::new(c_ntw, s_ntw),
            );
        }
    }
}

/// Checks the invariants that should hold once both directions report
/// nothing left to read or write.
///
/// A direction whose filter has not reached `QuitFilter` is *not* checked
/// here even if its socket closed — that contract belongs to
/// [`bidirectional_filtered_proxy_ex`], which runs after this core returns.
/// A direction can only have leftover write backlog if something enqueued
/// it, which only a filter does, so the pending-writes check only makes
/// sense once that filter has deliberately stopped.
fn check_post_conditions<S: ProxySocket>(
    pair: &ProxyPair<S>,
    filters: &FilterPair<'_>,
) -> ProxyResult<()> {
    for which in ALL_DIRECTIONS {
        if !filters.get(which).current_decision().instruction.is_quit() {
            continue;
        }
        let sockbuf = pair.get(which);
        if sockbuf.definitely_has_future_writes() {
            if sockbuf.disconnected() {
                return Err(ProxyError::SocketDroppedWithPendingWrites(which));
            }
            debug_assert!(
                !sockbuf.has_known_writes_pending(),
                "{which:?}: a ready-to-send placeholder survived to the exit condition"
            );
        }
    }
    Ok(())
}

/// Mediates `pair` until both directions' filters reach `QuitFilter` with
/// nothing left to write, `timeout` elapses with nothing ready, or a fatal
/// error occurs.
///
/// Does not itself treat "a socket closed while its filter was still
/// reading" as an error — see [`bidirectional_filtered_proxy_ex`], which
/// adds that check on top of this function's result.
pub fn bidirectional_filtered_proxy_core<S: ProxySocket>(
    pair: &mut ProxyPair<S>,
    filters: &mut FilterPair<'_>,
    read_so_far: &mut PerDirection<usize>,
    timeout: Duration,
    config: &EngineConfig,
) -> ProxyResult<CoreOutcome> {
    logging::info("bidirectional_filtered_proxy_core: starting");

    for which in ALL_DIRECTIONS {
        filters.get_mut(which).setup_first_instruction();
    }

    let mut sent_so_far = PerDirection::new(0usize, 0usize);
    let mut socket_closed = PerDirection::new(false, false);
    let mut read_a_zero = PerDirection::new(false, false);

    for which in ALL_DIRECTIONS {
        let invalid = pair.get(which).is_invalid();
        socket_closed[which] = invalid;
        if invalid {
            let is_quit = filters.get_mut(which).current_decision().instruction.is_quit();
            if !is_quit {
                let (this, other) = pair.split_mut(which);
                filter_helper(this, other, filters.get_mut(which), 0, 0, true);
            }
        }
    }

    let mut cumulative_backoff = Duration::ZERO;

    loop {
        let (need_to_read, need_to_write) =
            settle_intents(pair, filters, &read_a_zero, read_so_far);

        let satisfied = ALL_DIRECTIONS.iter().all(|&which| {
            need_to_read[which].is_known_to_be(0) && need_to_write[which] == 0
        });
        if satisfied {
            check_post_conditions(pair, filters)?;
            logging::info("bidirectional_filtered_proxy_core: both directions satisfied");
            return Ok(CoreOutcome {
                sent_so_far,
                socket_closed,
                read_a_zero,
                timed_out: false,
            });
        }

        let mut fds = PerDirection::from_fn(|which| {
            let sockbuf = pair.get(which);
            PollFd::new(
                sockbuf.raw_fd(),
                !need_to_read[which].is_known_to_be(0),
                need_to_write[which] > 0,
            )
        });

        match readiness::poll(&mut fds.0, timeout) {
            Ok(0) => {
                logging::info("bidirectional_filtered_proxy_core: readiness wait timed out");
                return Ok(CoreOutcome {
                    sent_so_far,
                    socket_closed,
                    read_a_zero,
                    timed_out: true,
                });
            }
            Ok(_) => {}
            Err(e) => match e.kind() {
                std::io::ErrorKind::Interrupted => {
                    cumulative_backoff += config.sleep_time;
                    if cumulative_backoff >= timeout {
                        return Err(ProxyError::BackoffExceedsTimeout {
                            backoff_ms: cumulative_backoff.as_millis() as u64,
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    logging::warn("readiness wait interrupted, backing off and retrying");
                    crate::sys::thread::sleep(config.sleep_time);
                    continue;
                }
                std::io::ErrorKind::WouldBlock => continue,
                _ => return Err(ProxyError::PollError(e)),
            },
        }

        // POLLHUP commonly accompanies an ordinary POLLIN on Linux for a
        // peer that simply sent FIN — only treat error/hangup/invalid as
        // fatal when the descriptor offers no other progress this round, so
        // a plain orderly close still reaches the usual recv()==0 handling.
        for which in ALL_DIRECTIONS {
            let pf = fds[which];
            if pf.error_hangup_invalid() && !pf.readable() && !pf.writable() {
                return Err(ProxyError::PeerErrorHangup(which));
            }
        }

        // Writes.
        for which in ALL_DIRECTIONS {
            if !fds[which].writable() {
                continue;
            }
            loop {
                let sockbuf = pair.get_mut(which);
                let Some(contents) = sockbuf.peek_known_contents() else {
                    break;
                };
                let peer = sockbuf.peer_addr();
                let sock = sockbuf
                    .sock_mut()
                    .expect("a writable direction must have a live socket");
                match send_bounded(sock, &contents, peer, timeout) {
                    Ok(n) => {
                        debug_assert_eq!(n, contents.len());
                        let sockbuf = pair.get_mut(which);
                        sockbuf.record_write(&contents);
                        sockbuf.placeholders.pop_front();
                        sent_so_far[which] += n;
                    }
                    Err(outcome) => match outcome.class {
                        ErrorClass::PeerClosed => {
                            logging::warn("peer closed connection during write");
                            socket_closed[which] = true;
                            pair.get_mut(which).shutdown_and_close();
                            break;
                        }
                        ErrorClass::Fatal => {
                            return Err(ProxyError::WriteError(which, outcome.source));
                        }
                        ErrorClass::Retry | ErrorClass::WouldBlock => break,
                    },
                }
            }
        }

        // Reads.
        for which in ALL_DIRECTIONS {
            if !fds[which].readable() {
                continue;
            }
            let sockbuf = pair.get_mut(which);
            let buf_len_initial = sockbuf.uncommitted_bytes.len();
            let mut buf = vec![0u8; config.buf_size];
            let sock = match sockbuf.sock_mut() {
                Some(s) => s,
                None => continue,
            };
            match recv_once(sock, &mut buf) {
                Ok((0, _)) if sock.is_connection_oriented() => {
                    read_a_zero[which] = true;
                    let (this, other) = pair.split_mut(which);
                    filter_helper(
                        this,
                        other,
                        filters.get_mut(which),
                        buf_len_initial,
                        read_so_far[which],
                        true,
                    );
                }
                Ok((n, _)) => {
                    sockbuf.record_read(&buf[..n]);
                    let decision = filters.get_mut(which).current_decision();
                    match decision.instruction {
                        Instruction::BytesUnknown => {
                            sockbuf.uncommitted_bytes.extend_from_slice(&buf[..n]);
                        }
                        Instruction::BytesMax { .. } => {
                            let k = need_to_read[which]
                                .known_value()
                                .expect("BytesMax direction must have a known needToRead while reading");
                            if n <= k {
                                sockbuf.uncommitted_bytes.extend_from_slice(&buf[..n]);
                            } else {
                                sockbuf.uncommitted_bytes.extend_from_slice(&buf[..k]);
                                sockbuf.unfiltered_bytes.extend_from_slice(&buf[k..n]);
                            }
                        }
                        Instruction::UntilDelimiter { delimiter } => {
                            sockbuf.unfiltered_bytes.extend_from_slice(&buf[..n]);
                            if let Some(pos) = find_subslice(&sockbuf.unfiltered_bytes, &delimiter)
                            {
                                let cut = pos + delimiter.len();
                                let moved: Vec<u8> =
                                    sockbuf.unfiltered_bytes.drain(0..cut).collect();
                                sockbuf.uncommitted_bytes.extend_from_slice(&moved);
                            }
                        }
                        Instruction::BytesExact { .. } => {
                            let k = need_to_read[which]
                                .known_value()
                                .expect("BytesExact direction must have a known needToRead while reading");
                            if n >= k {
                                let existing: Vec<u8> =
                                    sockbuf.unfiltered_bytes.drain(..).collect();
                                sockbuf.uncommitted_bytes.extend_from_slice(&existing);
                                sockbuf.uncommitted_bytes.extend_from_slice(&buf[..k]);
                                sockbuf.unfiltered_bytes.extend_from_slice(&buf[k..n]);
                            } else {
                                sockbuf.unfiltered_bytes.extend_from_slice(&buf[..n]);
                            }
                        }
                        Instruction::QuitFilter => {
                            unreachable!("engine never reads a direction whose filter quit")
                        }
                    }

                    let grew = sockbuf.uncommitted_bytes.len() - buf_len_initial;
                    if grew > 0 {
                        read_so_far[which] += grew;
                        let (this, other) = pair.split_mut(which);
                        filter_helper(
                            this,
                            other,
                            filters.get_mut(which),
                            buf_len_initial,
                            read_so_far[which],
                            false,
                        );
                    }
                }
                Err(outcome) => match outcome.class {
                    ErrorClass::Retry | ErrorClass::WouldBlock => {}
                    ErrorClass::PeerClosed => {
                        logging::warn("peer reset connection during read");
                        socket_closed[which] = true;
                        pair.get_mut(which).shutdown_and_close();
                        let (this, other) = pair.split_mut(which);
                        filter_helper(
                            this,
                            other,
                            filters.get_mut(which),
                            buf_len_initial,
                            read_so_far[which],
                            true,
                        );
                    }
                    ErrorClass::Fatal => {
                        return Err(ProxyError::ReadError(which, outcome.source));
                    }
                },
            }
        }
    }
}

/// [`bidirectional_filtered_proxy_core`], plus a check that a direction
/// never closed while its filter still expected to read.
pub fn bidirectional_filtered_proxy_ex<S: ProxySocket>(
    pair: &mut ProxyPair<S>,
    filters: &mut FilterPair<'_>,
    read_so_far: &mut PerDirection<usize>,
    timeout: Duration,
    config: &EngineConfig,
) -> ProxyResult<CoreOutcome> {
    let outcome = bidirectional_filtered_proxy_core(pair, filters, read_so_far, timeout, config)?;
    for which in ALL_DIRECTIONS {
        if outcome.socket_closed[which]
            && !filters.get(which).current_decision().instruction.is_quit()
        {
            return Err(ProxyError::SocketClosedDuringCommunication(which));
        }
    }
    Ok(outcome)
}

/// What [`unidirectional_proxy`] observed for the direction the caller asked
/// about.
#[derive(Debug)]
pub struct UnidirectionalOutcome {
    pub sent: usize,
    pub socket_closed: bool,
    pub timed_out: bool,
}

/// Drains `which`'s socket into `pair`'s opposite direction without
/// filtering, by attaching a [`PassthroughFilter`] to both sides.
///
/// Grounded on `doUnidirectionalProxyCore`, which is `doBidirectionalFilteredProxyCore`
/// called with a pair of no-framing copy filters and only one direction's
/// byte count reported back to the caller.
pub fn unidirectional_proxy<S: ProxySocket>(
    which: Direction,
    pair: &mut ProxyPair<S>,
    timeout: Duration,
    config: &EngineConfig,
) -> ProxyResult<UnidirectionalOutcome> {
    let mut client_filter = PassthroughFilter::default();
    let mut server_filter = PassthroughFilter::default();
    let mut filters = FilterPair::new(&mut client_filter, &mut server_filter);
    let mut read_so_far = PerDirection::new(0usize, 0usize);
    let outcome =
        bidirectional_filtered_proxy_core(pair, &mut filters, &mut read_so_far, timeout, config)?;
    Ok(UnidirectionalOutcome {
        sent: outcome.sent_so_far[which],
        socket_closed: outcome.socket_closed[which],
        timed_out: outcome.timed_out,
    })
}
