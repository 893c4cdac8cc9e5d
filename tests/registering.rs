mod util;

use std::cell::Cell;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

use evloop::Interest;

use util::init_with_loop;

fn pair() -> (UnixStream, UnixStream) {
    let (local, remote) = UnixStream::pair().unwrap();
    remote.set_nonblocking(true).unwrap();
    (local, remote)
}

fn drain(stream: &UnixStream) {
    use std::io::Read;
    let mut buf = [0; 512];
    loop {
        match (&*stream).read(&mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(ref err) if util::would_block(err) => return,
            Err(ref err) if util::interrupted(err) => continue,
            Err(err) => panic!("read failed: {}", err),
        }
    }
}

#[test]
fn register_deregister_roundtrip() {
    let mut ev = init_with_loop();
    let (mut local, remote) = pair();
    let fd = remote.as_raw_fd();

    let fired = Rc::new(Cell::new(0));

    // Add then immediately remove; pending data must not reach the
    // removed callback.
    let seen = Rc::clone(&fired);
    ev.register(fd, Interest::READABLE, move |_, _, _| {
        seen.set(seen.get() + 1);
    })
    .unwrap();
    ev.deregister(fd, Interest::READABLE).unwrap();

    local.write_all(b"ping").unwrap();
    // No-op timer bounding each iteration's wait.
    let _guard = ev.add_timer(Duration::from_millis(50), |_| {}).unwrap();
    ev.run_once().unwrap();
    assert_eq!(fired.get(), 0);

    // Registering again restores delivery of the still-pending data.
    let seen = Rc::clone(&fired);
    let reader = remote.try_clone().unwrap();
    ev.register(fd, Interest::READABLE, move |_, _, ready| {
        assert!(ready.is_readable());
        seen.set(seen.get() + 1);
        drain(&reader);
    })
    .unwrap();
    ev.run_once().unwrap();
    assert_eq!(fired.get(), 1);
}

#[test]
fn reregistering_replaces_the_callback() {
    let mut ev = init_with_loop();
    let (mut local, remote) = pair();
    let fd = remote.as_raw_fd();

    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));

    let seen = Rc::clone(&first);
    ev.register(fd, Interest::READABLE, move |_, _, _| {
        seen.set(seen.get() + 1);
    })
    .unwrap();

    // One callback per descriptor: the second registration wins.
    let seen = Rc::clone(&second);
    let reader = remote.try_clone().unwrap();
    ev.register(fd, Interest::READABLE, move |_, _, _| {
        seen.set(seen.get() + 1);
        drain(&reader);
    })
    .unwrap();

    local.write_all(b"ping").unwrap();
    let _guard = ev
        .add_timer(Duration::from_millis(50), |ev| ev.shutdown())
        .unwrap();
    ev.run().unwrap();

    assert_eq!(first.get(), 0);
    assert_eq!(second.get(), 1);
}

#[test]
fn deregister_without_interest_is_noop() {
    let mut ev = init_with_loop();
    let (_local, remote) = pair();
    let fd = remote.as_raw_fd();

    // Never registered: removing is a successful no-op.
    assert!(ev.deregister(fd, Interest::READABLE).is_ok());
    // Outside the table entirely: an error.
    assert!(ev.deregister(4096, Interest::READABLE).is_err());
}

#[test]
fn table_growth_preserves_entries() {
    const PAIRS: usize = 40;

    let mut ev = init_with_loop();
    let fired = Rc::new(Cell::new(0));

    // Enough descriptors to force the fd-indexed table through several
    // doublings; every registration must survive the growth.
    let mut streams = Vec::with_capacity(PAIRS);
    for _ in 0..PAIRS {
        let (mut local, remote) = pair();
        let fd = remote.as_raw_fd();
        let seen = Rc::clone(&fired);
        let reader = remote.try_clone().unwrap();
        ev.register(fd, Interest::READABLE, move |ev, _, _| {
            seen.set(seen.get() + 1);
            drain(&reader);
            if seen.get() == PAIRS {
                ev.shutdown();
            }
        })
        .unwrap();
        local.write_all(b"x").unwrap();
        streams.push((local, remote));
    }

    let _guard = ev
        .add_timer(Duration::from_secs(5), |ev| ev.shutdown())
        .unwrap();
    ev.run().unwrap();
    assert_eq!(fired.get(), PAIRS);
}

#[test]
fn deregister_mid_batch_suppresses_dispatch() {
    let mut ev = init_with_loop();

    let (mut local_a, remote_a) = pair();
    let (mut local_b, remote_b) = pair();
    let fd_a = remote_a.as_raw_fd();
    let fd_b = remote_b.as_raw_fd();

    let invoked = Rc::new(Cell::new(0));

    // Whichever callback runs first removes the other; the loser must
    // not be dispatched in the same iteration even though the kernel
    // reported it ready.
    let both = Interest::READABLE.add(Interest::WRITABLE);
    let seen = Rc::clone(&invoked);
    let reader = remote_a.try_clone().unwrap();
    ev.register(fd_a, Interest::READABLE, move |ev, _, _| {
        seen.set(seen.get() + 1);
        drain(&reader);
        let _ = ev.deregister(fd_b, both);
    })
    .unwrap();
    let seen = Rc::clone(&invoked);
    let reader = remote_b.try_clone().unwrap();
    ev.register(fd_b, Interest::READABLE, move |ev, _, _| {
        seen.set(seen.get() + 1);
        drain(&reader);
        let _ = ev.deregister(fd_a, both);
    })
    .unwrap();

    // Both descriptors are readable before the iteration starts.
    local_a.write_all(b"a").unwrap();
    local_b.write_all(b"b").unwrap();

    // Bounds the wait in case readiness is never reported.
    let _guard = ev
        .add_timer(Duration::from_secs(2), |ev| ev.shutdown())
        .unwrap();
    ev.run_once().unwrap();
    assert_eq!(invoked.get(), 1);
}

#[test]
fn reentrant_run_is_rejected() {
    let mut ev = init_with_loop();

    let rejected = Rc::new(Cell::new(false));
    let seen = Rc::clone(&rejected);
    let _timer = ev
        .add_timer(Duration::from_millis(10), move |ev| {
            seen.set(ev.run_once().is_err() && ev.run().is_err());
            ev.shutdown();
        })
        .unwrap();

    ev.run().unwrap();
    assert!(rejected.get());
}
