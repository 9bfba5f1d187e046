//! A dedicated evaluation thread owning one [`DataTreeEvaluator`].
//!
//! Edits arrive over a channel. Before each pass the worker drains whatever
//! is already queued, so a burst of edits costs a single pass. Snapshots are
//! published behind a mutex and effects go out on their own channel.

use crate::engine::{DataTreeEvaluator, Edit, EvaluatedTree};
use crate::entity::{Entity, EntityConfig};
use crate::sandbox::Effect;
use crate::value::Value;
use log::{debug, error, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

enum Message {
    Edit(Edit),
    Full,
    Barrier(Sender<()>),
    Shutdown,
}

pub struct EvaluationWorker {
    sender: Sender<Message>,
    snapshot: Arc<Mutex<Arc<EvaluatedTree>>>,
    handle: Option<JoinHandle<DataTreeEvaluator>>,
}

impl EvaluationWorker {
    /// Moves `evaluator` onto a new thread. Effects of every pass are sent to
    /// the returned receiver.
    pub fn spawn(evaluator: DataTreeEvaluator) -> (Self, Receiver<Vec<Effect>>) {
        let (sender, inbox) = mpsc::channel();
        let (effects_tx, effects_rx) = mpsc::channel();
        let snapshot = Arc::new(Mutex::new(evaluator.snapshot()));
        let published = Arc::clone(&snapshot);

        let handle = thread::spawn(move || run(evaluator, inbox, published, effects_tx));
        let worker = EvaluationWorker {
            sender,
            snapshot,
            handle: Some(handle),
        };
        (worker, effects_rx)
    }

    pub fn submit(&self, edit: Edit) {
        if self.sender.send(Message::Edit(edit)).is_err() {
            warn!("evaluation worker has stopped, edit dropped");
        }
    }

    pub fn set_value(&self, entity: &str, path: &str, value: impl Into<Value>) {
        self.submit(Edit::SetValue {
            entity: entity.to_string(),
            path: path.to_string(),
            value: value.into(),
        });
    }

    pub fn register(&self, entity: Entity, config: EntityConfig) {
        self.submit(Edit::Register { entity, config });
    }

    pub fn remove(&self, name: &str) {
        self.submit(Edit::Remove {
            entity: name.to_string(),
        });
    }

    /// Requests a full re-evaluation.
    pub fn evaluate_full(&self) {
        if self.sender.send(Message::Full).is_err() {
            warn!("evaluation worker has stopped, full pass dropped");
        }
    }

    /// Blocks until every message sent before this call has been evaluated.
    pub fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        if self.sender.send(Message::Barrier(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<EvaluatedTree> {
        match self.snapshot.lock() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Stops the thread and hands the evaluator back.
    pub fn shutdown(mut self) -> Option<DataTreeEvaluator> {
        let _ = self.sender.send(Message::Shutdown);
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

impl Drop for EvaluationWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(Message::Shutdown);
            let _ = handle.join();
        }
    }
}

fn run(
    mut evaluator: DataTreeEvaluator,
    inbox: Receiver<Message>,
    snapshot: Arc<Mutex<Arc<EvaluatedTree>>>,
    effects: Sender<Vec<Effect>>,
) -> DataTreeEvaluator {
    while let Ok(first) = inbox.recv() {
        let mut batch = vec![first];
        batch.extend(inbox.try_iter());

        let mut full = false;
        let mut barriers = Vec::new();
        let mut shutdown = false;
        for message in batch {
            match message {
                Message::Edit(edit) => queue(&mut evaluator, edit),
                Message::Full => full = true,
                Message::Barrier(done) => barriers.push(done),
                Message::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
        }

        let mut result = if full {
            evaluator.evaluate_full()
        } else {
            evaluator.process_pending()
        };
        // A failed edit is dropped; the edits behind it still belong to this batch.
        loop {
            match result {
                Ok(report) => {
                    debug!("worker pass: {} path(s)", report.evaluated.len());
                    if !report.effects.is_empty() {
                        let _ = effects.send(report.effects);
                    }
                    break;
                }
                Err(e) => error!("evaluation pass failed: {}", e),
            }
            result = evaluator.process_pending();
        }
        match snapshot.lock() {
            Ok(mut guard) => *guard = evaluator.snapshot(),
            Err(poisoned) => *poisoned.into_inner() = evaluator.snapshot(),
        }

        for done in barriers {
            let _ = done.send(());
        }
        if shutdown {
            break;
        }
    }
    evaluator
}

fn queue(evaluator: &mut DataTreeEvaluator, edit: Edit) {
    match edit {
        Edit::SetValue {
            entity,
            path,
            value,
        } => evaluator.apply_entity_edit(&entity, &path, value),
        Edit::JsObjectParse { entity, body } => evaluator.apply_js_object_parse(&entity, body),
        Edit::JsObjectSource { entity, source } => evaluator.apply_js_object_source(&entity, &source),
        Edit::Register { entity, config } => {
            if let Err(e) = evaluator.register_entity(entity, config) {
                error!("rejected registration: {}", e);
            }
        }
        Edit::Remove { entity } => evaluator.remove_entity(&entity),
    }
}
