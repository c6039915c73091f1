use std::sync::Arc;

use client::Channel;

/// Writes back whatever it reads. Used to verify a path through the
/// multiplexer end to end; acquires no limiter, since it never spawns a
/// process or a connection.
pub struct Echo;

impl Echo {
    pub fn attach(channel: Channel) {
        let echo = channel.clone();
        channel.set_callbacks(Some(Arc::new(move |data| echo.write(data))), None, None);
    }
}
