// Not all functions are used by all tests.
#![allow(dead_code)]

use std::io;
use std::sync::Once;

use evloop::EventLoop;

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        env_logger::try_init().expect("unable to initialise logger");
    })
}

pub fn init_with_loop() -> EventLoop {
    init();
    EventLoop::new().expect("unable to create event loop")
}

pub fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

pub fn interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}
