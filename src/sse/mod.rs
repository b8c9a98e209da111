//! Server-Sent Events Transport
//!
//! Streams one topic's broker events over a long-lived `text/event-stream`
//! response. Each frame carries `id:` (the event sequence) and `data:` (the
//! `{id, type, data}` envelope), so a reconnecting `EventSource` resumes
//! from where it left off via `Last-Event-ID`.
//!
//! ```javascript
//! const source = new EventSource('/api/v1/topics/assessment-42/events');
//! source.onmessage = (e) => console.log(JSON.parse(e.data));
//! ```

mod handler;

pub use handler::{event_stream, sse_handler, LAST_EVENT_ID};
