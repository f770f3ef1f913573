/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that fires event handlers.
//!
//! Components publish [events](crate::events) into a channel; the event bus thread receives them and runs
//! every handler registered for the event's type, in registration order. Handlers therefore never run on
//! a thread that holds a participant's or a collection's locks.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) insert_entry_handlers: Vec<HandlerPtr<InsertEntryEvent>>,
    pub(crate) commit_index_advance_handlers: Vec<HandlerPtr<CommitIndexAdvanceEvent>>,
    pub(crate) send_append_entries_handlers: Vec<HandlerPtr<SendAppendEntriesEvent>>,
    pub(crate) receive_append_entries_handlers: Vec<HandlerPtr<ReceiveAppendEntriesEvent>>,
    pub(crate) follower_unreachable_handlers: Vec<HandlerPtr<FollowerUnreachableEvent>>,
    pub(crate) become_leader_handlers: Vec<HandlerPtr<BecomeLeaderEvent>>,
    pub(crate) become_follower_handlers: Vec<HandlerPtr<BecomeFollowerEvent>>,
    pub(crate) resign_handlers: Vec<HandlerPtr<ResignEvent>>,
    pub(crate) apply_revision_updates_handlers: Vec<HandlerPtr<ApplyRevisionUpdatesEvent>>,
    pub(crate) serialize_revision_tree_handlers: Vec<HandlerPtr<SerializeRevisionTreeEvent>>,
    pub(crate) hibernate_revision_tree_handlers: Vec<HandlerPtr<HibernateRevisionTreeEvent>>,
    pub(crate) rebuild_revision_tree_handlers: Vec<HandlerPtr<RebuildRevisionTreeEvent>>,
    pub(crate) revision_tree_inconsistent_handlers: Vec<HandlerPtr<RevisionTreeInconsistentEvent>>,
}

impl EventHandlers {
    /// Handlers with the default loggers of every event registered if `log_events` is set.
    pub(crate) fn new(log_events: bool) -> EventHandlers {
        let mut handlers = EventHandlers::default();
        if log_events {
            handlers.insert_entry_handlers.push(InsertEntryEvent::get_logger());
            handlers.commit_index_advance_handlers.push(CommitIndexAdvanceEvent::get_logger());
            handlers.send_append_entries_handlers.push(SendAppendEntriesEvent::get_logger());
            handlers.receive_append_entries_handlers.push(ReceiveAppendEntriesEvent::get_logger());
            handlers.follower_unreachable_handlers.push(FollowerUnreachableEvent::get_logger());
            handlers.become_leader_handlers.push(BecomeLeaderEvent::get_logger());
            handlers.become_follower_handlers.push(BecomeFollowerEvent::get_logger());
            handlers.resign_handlers.push(ResignEvent::get_logger());
            handlers.apply_revision_updates_handlers.push(ApplyRevisionUpdatesEvent::get_logger());
            handlers.serialize_revision_tree_handlers.push(SerializeRevisionTreeEvent::get_logger());
            handlers.hibernate_revision_tree_handlers.push(HibernateRevisionTreeEvent::get_logger());
            handlers.rebuild_revision_tree_handlers.push(RebuildRevisionTreeEvent::get_logger());
            handlers.revision_tree_inconsistent_handlers.push(RevisionTreeInconsistentEvent::get_logger());
        }
        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_entry_handlers.is_empty()
            && self.commit_index_advance_handlers.is_empty()
            && self.send_append_entries_handlers.is_empty()
            && self.receive_append_entries_handlers.is_empty()
            && self.follower_unreachable_handlers.is_empty()
            && self.become_leader_handlers.is_empty()
            && self.become_follower_handlers.is_empty()
            && self.resign_handlers.is_empty()
            && self.apply_revision_updates_handlers.is_empty()
            && self.serialize_revision_tree_handlers.is_empty()
            && self.hibernate_revision_tree_handlers.is_empty()
            && self.rebuild_revision_tree_handlers.is_empty()
            && self.revision_tree_inconsistent_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertEntry(insert_entry_event) =>
                self.insert_entry_handlers.iter().for_each(|handler| handler(&insert_entry_event)),

            Event::CommitIndexAdvance(commit_event) =>
                self.commit_index_advance_handlers.iter().for_each(|handler| handler(&commit_event)),

            Event::SendAppendEntries(send_event) =>
                self.send_append_entries_handlers.iter().for_each(|handler| handler(&send_event)),

            Event::ReceiveAppendEntries(receive_event) =>
                self.receive_append_entries_handlers.iter().for_each(|handler| handler(&receive_event)),

            Event::FollowerUnreachable(unreachable_event) =>
                self.follower_unreachable_handlers.iter().for_each(|handler| handler(&unreachable_event)),

            Event::BecomeLeader(become_leader_event) =>
                self.become_leader_handlers.iter().for_each(|handler| handler(&become_leader_event)),

            Event::BecomeFollower(become_follower_event) =>
                self.become_follower_handlers.iter().for_each(|handler| handler(&become_follower_event)),

            Event::Resign(resign_event) =>
                self.resign_handlers.iter().for_each(|handler| handler(&resign_event)),

            Event::ApplyRevisionUpdates(apply_event) =>
                self.apply_revision_updates_handlers.iter().for_each(|handler| handler(&apply_event)),

            Event::SerializeRevisionTree(serialize_event) =>
                self.serialize_revision_tree_handlers.iter().for_each(|handler| handler(&serialize_event)),

            Event::HibernateRevisionTree(hibernate_event) =>
                self.hibernate_revision_tree_handlers.iter().for_each(|handler| handler(&hibernate_event)),

            Event::RebuildRevisionTree(rebuild_event) =>
                self.rebuild_revision_tree_handlers.iter().for_each(|handler| handler(&rebuild_event)),

            Event::RevisionTreeInconsistent(inconsistent_event) =>
                self.revision_tree_inconsistent_handlers.iter().for_each(|handler| handler(&inconsistent_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Fire whatever was published before the shutdown.
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

/// Keeps an event bus thread alive. Dropping it stops the thread after the pending events are handled.
pub(crate) struct EventBus {
    event_publisher: Sender<Event>,
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl EventBus {
    /// Start an event bus, unless there are no handlers to fire.
    pub(crate) fn start(event_handlers: EventHandlers) -> Option<EventBus> {
        if event_handlers.is_empty() {
            return None;
        }
        let (event_publisher, event_subscriber) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let handle = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
        Some(EventBus {
            event_publisher,
            shutdown,
            handle: Some(handle),
        })
    }

    pub(crate) fn publisher(&self) -> Sender<Event> {
        self.event_publisher.clone()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
