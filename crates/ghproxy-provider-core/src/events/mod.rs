mod gauge_sink;
mod hub;
mod terminal_sink;
mod types;

pub use gauge_sink::{GaugeEventSink, GaugeKey};
pub use hub::{EventHub, EventSink};
pub use terminal_sink::TerminalEventSink;
pub use types::{
    DownstreamEvent, Event, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET_SECONDS,
    RateLimitSnapshot,
};
