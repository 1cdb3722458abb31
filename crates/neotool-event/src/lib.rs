//! Application-wide event fan-out for neotool.
//!
//! Mini-apps never hold the session directly. They listen to named events on
//! the [`Bus`] and ask for work by broadcasting `<name>-request` messages;
//! the [`EventHandler`] translates between the two and the
//! [`neotool_session::ConnectionManager`].
//!
//! # Components
//!
//! - [`Bus`]: broadcast channel pair for events and requests
//! - [`EventHandler`]: session-to-bus adapter and request dispatcher
//! - [`AppConfig`] / [`AppData`]: registered mini-apps and their switches

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod app;
mod bus;
mod error;
mod handler;

pub use app::{APP_DATA_KEY, AppConfig, AppData, AppRegistry};
pub use bus::{
    Bus, BusConfig, DEFAULT_BUS_CAPACITY, Event, EventKind, Key, Listener, RepeatHandle, Request,
};
pub use error::EventError;
pub use handler::EventHandler;
