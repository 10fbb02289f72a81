//! Configuration shared by the `devpoll` daemon and `devpoll-cli`

pub mod config;
