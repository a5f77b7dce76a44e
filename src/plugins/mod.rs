// Plugin infrastructure for playdeck

pub mod callbacks;

pub use callbacks::{
    create_observer, parse_observer_spec, JobObserver, JsonLogObserver, ObserverRegistry,
    TimerObserver, WebhookObserver,
};
