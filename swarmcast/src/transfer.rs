//! Chunk transfer: Request and Reply handling.
//!
//! A pull runs as a chain. The requester asks one neighbor for its first
//! missing chunk; the neighbor answers; on receiving the answer the requester
//! immediately asks the same neighbor again. Any other packet on the medium
//! breaks the chain, and the next advertisement restarts it.

use tracing::{debug, info, trace};

use crate::config::NodeConfig;
use crate::node::Node;
use crate::time::Duration;
use crate::traits::{Clock, Random, Scheduler, Transport};
use crate::types::{Event, NodeAddress, ProtocolError, Reply, Request};
use crate::wire::Message;

impl<T, S, R, Clk, Cfg> Node<T, S, R, Clk, Cfg>
where
    T: Transport,
    S: Scheduler,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Send the Request armed by the last advertisement or reply.
    ///
    /// The chunk is chosen now, not when the timer was armed.
    pub(crate) fn on_request_timer(&mut self) {
        let Some(pending) = self.take_pending_request() else {
            return;
        };
        let Some(chunk_id) = self
            .catalog()
            .find_by_id(pending.file_id)
            .and_then(|record| record.next_missing())
        else {
            debug!(
                node = %self.address(),
                file_id = pending.file_id,
                "file completed before request fired"
            );
            return;
        };

        debug!(
            node = %self.address(),
            target = %pending.target,
            file_id = pending.file_id,
            chunk_id,
            "requesting chunk"
        );
        self.send(Message::Request(Request {
            target: pending.target,
            file_id: pending.file_id,
            chunk_id,
        }));
    }

    pub(crate) fn handle_request(&mut self, req: Request, from: NodeAddress) -> Result<(), ProtocolError> {
        if req.target != self.address() {
            self.metrics_mut().requests_ignored += 1;
            trace!(
                node = %self.address(),
                %from,
                target = %req.target,
                "request for another node"
            );
            self.rearm_advertise();
            return Ok(());
        }

        let record = self
            .catalog()
            .find_by_id(req.file_id)
            .ok_or(ProtocolError::UnknownFile {
                requester: from,
                file_id: req.file_id,
            })?;
        if !record.has_chunk(req.chunk_id) {
            return Err(ProtocolError::ChunkNotHeld {
                requester: from,
                file_id: req.file_id,
                chunk_id: req.chunk_id,
            });
        }

        let reply = Reply {
            original_requester: from,
            file_id: req.file_id,
            file_size_kb: record.size_kb(),
            chunk_id: req.chunk_id,
            chunk_size: record.chunk_size(req.chunk_id),
        };
        debug!(
            node = %self.address(),
            requester = %from,
            file_id = reply.file_id,
            chunk_id = reply.chunk_id,
            chunk_size = reply.chunk_size,
            "serving chunk"
        );
        self.arm_reply(reply);
        self.rearm_advertise();
        Ok(())
    }

    pub(crate) fn on_reply_timer(&mut self) {
        if let Some(reply) = self.take_pending_reply() {
            self.send(Message::Reply(reply));
        }
    }

    /// Store the chunk carried by any overheard Reply; continue the chain
    /// when the Reply answers our own Request.
    pub(crate) fn handle_reply(&mut self, reply: Reply, from: NodeAddress) {
        let address = self.address();
        let record = self
            .catalog_mut()
            .lookup_or_create(reply.file_id, reply.file_size_kb);
        let was_full = record.is_full();
        let in_range = reply.chunk_id < record.chunk_count();
        let newly_held = record.mark_received(reply.chunk_id);
        record.record_seen_at(from);
        let completed = !was_full && record.is_full();

        if newly_held {
            trace!(
                node = %address,
                %from,
                file_id = reply.file_id,
                chunk_id = reply.chunk_id,
                "chunk stored"
            );
            self.push_event(Event::ChunkReceived {
                file_id: reply.file_id,
                chunk_id: reply.chunk_id,
                from,
            });
        } else if in_range {
            self.metrics_mut().duplicate_chunks += 1;
        } else {
            debug!(
                node = %address,
                file_id = reply.file_id,
                chunk_id = reply.chunk_id,
                "chunk outside known file, ignored"
            );
        }

        if completed {
            info!(
                node = %address,
                file_id = reply.file_id,
                at_s = self.now().as_secs_f64(),
                "file complete"
            );
            self.push_event(Event::FileCompleted {
                file_id: reply.file_id,
            });
            let full = self.catalog().full_count();
            self.observe_full_count(full);
        }

        if reply.original_requester == address {
            let neighbors = self.neighbors().len();
            match self.catalog().pick_file_to_request(from, neighbors) {
                Some(file_id) => self.arm_request(from, file_id, Duration::ZERO),
                None => {
                    debug!(node = %address, neighbor = %from, "nothing left to pull from neighbor");
                }
            }
        }
        self.rearm_advertise();
    }
}

#[cfg(test)]
mod tests {
    use crate::node::test_helpers::*;
    use crate::time::Duration;
    use crate::types::{
        Event, PendingRequest, ProtocolError, Reply, Request, TimerSlot, CHUNK_SIZE,
    };
    use crate::wire::{Decode, Encode, Message};

    fn request(target: u32, file_id: u32, chunk_id: u32) -> Vec<u8> {
        Message::Request(Request {
            target: addr(target),
            file_id,
            chunk_id,
        })
        .encode_to_vec()
    }

    fn reply_frame(requester: u32, file_id: u32, size_kb: u32, chunk_id: u32, chunk_size: u16) -> Vec<u8> {
        Message::Reply(Reply {
            original_requester: addr(requester),
            file_id,
            file_size_kb: size_kb,
            chunk_id,
            chunk_size,
        })
        .encode_to_vec()
    }

    #[test]
    fn test_request_answered_with_reply() {
        // Y (2) holds file 7 and is asked for chunk 0 by X (1).
        let mut y = test_node(2);
        y.set_initial_files(&[(7, 1000)]);
        y.start();
        y.handle_packet(&request(2, 7, 0), addr(1)).unwrap();

        let armed = y.scheduler().pending(TimerSlot::Reply).expect("reply armed");
        assert_eq!(armed.delay, Duration::ZERO);
        assert!(y.is_armed(TimerSlot::Advertise));
        assert_one_callback_per_slot(&y);

        fire(&mut y, TimerSlot::Reply);
        let frames = y.transport_mut().take_sent();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 17 + CHUNK_SIZE as usize);
        assert_eq!(
            Message::decode_from_slice(&frames[0]),
            Ok(Message::Reply(Reply {
                original_requester: addr(1),
                file_id: 7,
                file_size_kb: 1000,
                chunk_id: 0,
                chunk_size: 1450,
            }))
        );
    }

    #[test]
    fn test_last_chunk_reply_is_short() {
        let mut y = test_node(2);
        y.set_initial_files(&[(7, 1000)]);
        y.handle_packet(&request(2, 7, 689), addr(1)).unwrap();
        assert_eq!(y.pending_reply().map(|r| r.chunk_size), Some(950));
    }

    #[test]
    fn test_exact_multiple_last_chunk_reply_is_empty() {
        // 29 KB splits into exactly 20 chunks.
        let mut y = test_node(2);
        y.set_initial_files(&[(7, 29)]);
        y.handle_packet(&request(2, 7, 19), addr(1)).unwrap();
        assert_eq!(y.pending_reply().map(|r| r.chunk_size), Some(0));

        fire(&mut y, TimerSlot::Reply);
        let frames = y.transport_mut().take_sent();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 17);
    }

    #[test]
    fn test_reply_to_requester_chains_next_request() {
        let mut x = test_node(1);
        x.catalog_mut().merge_discovered(7, 1000, addr(2));
        x.handle_packet(&reply_frame(1, 7, 1000, 0, 1450), addr(2)).unwrap();

        let record = x.catalog().find_by_id(7).expect("record");
        assert!(record.has_chunk(0));
        assert_eq!(record.received_count(), 1);

        assert_eq!(
            x.pending_request(),
            Some(PendingRequest { target: addr(2), file_id: 7 })
        );
        let armed = x.scheduler().pending(TimerSlot::Request).expect("request armed");
        assert_eq!(armed.delay, Duration::ZERO);

        fire(&mut x, TimerSlot::Request);
        assert_eq!(
            sent_messages(&mut x),
            vec![Message::Request(Request {
                target: addr(2),
                file_id: 7,
                chunk_id: 1,
            })]
        );
        assert!(x.drain_events().contains(&Event::ChunkReceived {
            file_id: 7,
            chunk_id: 0,
            from: addr(2),
        }));
    }

    #[test]
    fn test_request_for_other_node_is_noise() {
        let mut z = test_node(3);
        z.set_initial_files(&[(7, 1000)]);
        z.start();
        z.handle_packet(&request(2, 7, 0), addr(1)).unwrap();

        assert!(!z.is_halted());
        assert!(!z.is_armed(TimerSlot::Reply));
        assert!(!z.is_armed(TimerSlot::Request));
        assert_eq!(z.pending_reply(), None);
        assert_eq!(z.metrics().requests_ignored, 1);
        assert_eq!(z.catalog().len(), 1);
        assert!(z.catalog().find_by_id(7).is_some_and(|r| r.is_full()));
        assert!(z.transport().sent().is_empty());
    }

    #[test]
    fn test_request_for_missing_chunk_halts() {
        let mut y = test_node(2);
        y.catalog_mut().merge_discovered(7, 1000, addr(9));
        let err = y.handle_packet(&request(2, 7, 3), addr(1)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ChunkNotHeld {
                requester: addr(1),
                file_id: 7,
                chunk_id: 3,
            }
        );
        assert!(y.is_halted());
    }

    #[test]
    fn test_overheard_reply_fills_listener() {
        let mut w = test_node(4);
        w.handle_packet(&reply_frame(1, 7, 1000, 5, 1450), addr(2)).unwrap();

        let record = w.catalog().find_by_id(7).expect("record created from reply");
        assert!(record.has_chunk(5));
        assert!(record.is_seen_at(addr(2)));
        // Not the requester: no follow-up pull.
        assert!(!w.is_armed(TimerSlot::Request));
        assert!(w.is_armed(TimerSlot::Advertise));
    }

    #[test]
    fn test_duplicate_and_out_of_range_chunks() {
        let mut x = test_node(1);
        let frame = reply_frame(9, 7, 10, 2, 1450);
        x.handle_packet(&frame, addr(2)).unwrap();
        x.handle_packet(&frame, addr(2)).unwrap();
        assert_eq!(x.metrics().duplicate_chunks, 1);
        assert_eq!(x.catalog().find_by_id(7).map(|r| r.received_count()), Some(1));

        x.handle_packet(&reply_frame(9, 7, 10, 500, 1450), addr(2)).unwrap();
        assert_eq!(x.catalog().find_by_id(7).map(|r| r.received_count()), Some(1));
        assert_eq!(x.metrics().duplicate_chunks, 1);
    }

    #[test]
    fn test_completion_event_and_high_water_mark() {
        // 2 KB = 2000 bytes = 2 chunks (1450 + 550).
        let mut x = test_node(1);
        x.catalog_mut().merge_discovered(7, 2, addr(2));
        x.handle_packet(&reply_frame(1, 7, 2, 0, 1450), addr(2)).unwrap();
        x.handle_packet(&reply_frame(1, 7, 2, 1, 550), addr(2)).unwrap();

        assert!(x.catalog().find_by_id(7).is_some_and(|r| r.is_full()));
        assert!(x.drain_events().contains(&Event::FileCompleted { file_id: 7 }));
        assert_eq!(x.max_full_files_observed(), 1);
        // Nothing else to pull from this neighbor.
        assert!(!x.is_armed(TimerSlot::Request));
    }

    #[test]
    fn test_request_timer_after_completion_sends_nothing() {
        let mut x = test_node(1);
        x.catalog_mut().merge_discovered(7, 2, addr(2));
        x.handle_packet(&reply_frame(1, 7, 2, 0, 1450), addr(2)).unwrap();
        assert!(x.is_armed(TimerSlot::Request));

        // The last chunk arrives through the catalog directly, as if it had
        // been stored between arming and firing.
        x.catalog_mut().lookup_or_create(7, 2).mark_received(1);
        fire(&mut x, TimerSlot::Request);
        assert!(x.transport().sent().is_empty());
    }

    #[test]
    fn test_full_exchange_between_two_nodes() {
        let mut x = test_node(1);
        let mut y = test_node(2);
        y.set_initial_files(&[(7, 10)]);
        x.start();
        y.start();

        // Y advertises; X schedules a pull.
        fire(&mut y, TimerSlot::Advertise);
        for frame in y.transport_mut().take_sent() {
            x.handle_packet(&frame, addr(2)).unwrap();
        }

        let chunks = x.catalog().find_by_id(7).expect("record").chunk_count();
        for _ in 0..chunks {
            fire(&mut x, TimerSlot::Request);
            for frame in x.transport_mut().take_sent() {
                y.handle_packet(&frame, addr(1)).unwrap();
            }
            fire(&mut y, TimerSlot::Reply);
            for frame in y.transport_mut().take_sent() {
                x.handle_packet(&frame, addr(2)).unwrap();
            }
        }

        assert!(x.catalog().find_by_id(7).is_some_and(|r| r.is_full()));
        assert_eq!(x.metrics().requests_sent, u64::from(chunks));
        assert_eq!(y.metrics().replies_sent, u64::from(chunks));
        assert!(!x.is_armed(TimerSlot::Request));
        assert_one_callback_per_slot(&x);
        assert_one_callback_per_slot(&y);
    }
}
