//! Output relay and per-session buffer.
//!
//! Routes output chunks to the terminal surface attached to a session, or
//! queues them while no surface is attached (or the surface is still
//! initializing). Buffering is bounded on both axes: at most `max_sessions`
//! buffered sessions (oldest buffer evicted wholesale) and at most
//! `max_chunks` chunks per session (oldest chunks dropped first).

use crate::host::SessionId;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// A UI-side terminal that can render session output.
pub trait Surface: Send {
    /// False while the surface is still initializing.
    fn is_ready(&self) -> bool {
        true
    }

    fn write(&mut self, data: &str);
}

/// Where a session's output currently goes.
pub enum Route {
    /// A surface is bound. `pending` holds output that arrived before the
    /// surface was ready to render.
    Attached {
        surface: Box<dyn Surface>,
        pending: VecDeque<String>,
    },
    /// No surface; output is queued.
    Buffering(VecDeque<String>),
}

pub struct OutputRelay {
    routes: HashMap<SessionId, Route>,
    /// Buffering sessions, in buffer creation order.
    buffer_order: VecDeque<SessionId>,
    max_sessions: usize,
    max_chunks: usize,
}

impl OutputRelay {
    pub fn new(max_sessions: usize, max_chunks: usize) -> Self {
        Self {
            routes: HashMap::new(),
            buffer_order: VecDeque::new(),
            max_sessions: max_sessions.max(1),
            max_chunks: max_chunks.max(1),
        }
    }

    /// Deliver or queue one output chunk.
    pub fn on_output(&mut self, session_id: &str, data: String) {
        match self.routes.get_mut(session_id) {
            Some(Route::Attached { surface, pending }) => {
                if surface.is_ready() {
                    for chunk in pending.drain(..) {
                        surface.write(&chunk);
                    }
                    surface.write(&data);
                } else {
                    push_bounded(pending, data, self.max_chunks);
                }
            }
            Some(Route::Buffering(queue)) => push_bounded(queue, data, self.max_chunks),
            None => {
                let mut queue = VecDeque::new();
                queue.push_back(data);
                self.insert_buffer(session_id, queue);
            }
        }
    }

    /// Bind a surface and flush anything buffered for the session, in
    /// arrival order, before any new output.
    pub fn on_attach(&mut self, session_id: &str, surface: Box<dyn Surface>) {
        let pending = match self.routes.remove(session_id) {
            Some(Route::Buffering(queue)) => {
                self.buffer_order.retain(|id| id != session_id);
                queue
            }
            Some(Route::Attached { pending, .. }) => pending,
            None => VecDeque::new(),
        };
        debug!(session_id, buffered = pending.len(), "surface attached");
        self.routes.insert(
            session_id.to_string(),
            Route::Attached { surface, pending },
        );
        self.on_ready(session_id);
    }

    /// Flush pending output once an attached surface reports ready.
    pub fn on_ready(&mut self, session_id: &str) {
        if let Some(Route::Attached { surface, pending }) = self.routes.get_mut(session_id) {
            if surface.is_ready() {
                for chunk in pending.drain(..) {
                    surface.write(&chunk);
                }
            }
        }
    }

    /// Unbind the surface; later output is buffered again. Output the
    /// surface never rendered is kept.
    pub fn on_detach(&mut self, session_id: &str) -> Option<Box<dyn Surface>> {
        match self.routes.remove(session_id) {
            Some(Route::Attached { surface, pending }) => {
                if !pending.is_empty() {
                    self.insert_buffer(session_id, pending);
                }
                debug!(session_id, "surface detached");
                Some(surface)
            }
            Some(buffering) => {
                self.routes.insert(session_id.to_string(), buffering);
                None
            }
            None => None,
        }
    }

    /// Forget a session entirely (close).
    pub fn discard(&mut self, session_id: &str) {
        self.routes.remove(session_id);
        self.buffer_order.retain(|id| id != session_id);
    }

    pub fn is_attached(&self, session_id: &str) -> bool {
        matches!(self.routes.get(session_id), Some(Route::Attached { .. }))
    }

    /// Chunks queued for a session (buffered or pending on its surface).
    pub fn queued(&self, session_id: &str) -> Vec<&str> {
        match self.routes.get(session_id) {
            Some(Route::Buffering(queue)) | Some(Route::Attached { pending: queue, .. }) => {
                queue.iter().map(String::as_str).collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of sessions holding a detached buffer.
    pub fn buffered_sessions(&self) -> usize {
        self.buffer_order.len()
    }

    fn insert_buffer(&mut self, session_id: &str, mut queue: VecDeque<String>) {
        while self.buffer_order.len() >= self.max_sessions {
            if let Some(evicted) = self.buffer_order.pop_front() {
                self.routes.remove(&evicted);
                debug!(session_id = %evicted, "evicted output buffer");
            }
        }
        while queue.len() > self.max_chunks {
            queue.pop_front();
        }
        self.routes
            .insert(session_id.to_string(), Route::Buffering(queue));
        self.buffer_order.push_back(session_id.to_string());
    }
}

fn push_bounded(queue: &mut VecDeque<String>, data: String, max: usize) {
    queue.push_back(data);
    while queue.len() > max {
        queue.pop_front();
    }
}
