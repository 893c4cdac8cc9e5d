mod util;

use std::cell::Cell;
use std::mem;
use std::rc::Rc;
use std::sync::Mutex;
use std::time::Duration;

use util::init_with_loop;

// Signal dispositions are process state; these tests cannot overlap.
static SERIAL: Mutex<()> = Mutex::new(());

fn raise(signo: i32) {
    unsafe {
        libc::raise(signo);
    }
}

fn disposition_is_default(signo: i32) -> bool {
    let mut act: libc::sigaction = unsafe { mem::zeroed() };
    unsafe {
        libc::sigaction(signo, std::ptr::null(), &mut act);
    }
    act.sa_sigaction == libc::SIG_DFL
}

#[test]
fn delivers_until_self_delete() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut ev = init_with_loop();

    let seen = Rc::new(Cell::new(0u32));
    let remaining = Rc::new(Cell::new(10u32));

    let seen_in_cb = Rc::clone(&seen);
    let remaining_in_cb = Rc::clone(&remaining);
    ev.add_signal(libc::SIGUSR1, move |ev, signo| {
        assert_eq!(signo, libc::SIGUSR1);
        seen_in_cb.set(seen_in_cb.get() + 1);
        remaining_in_cb.set(remaining_in_cb.get() - 1);
        if remaining_in_cb.get() == 0 {
            ev.del_signal(libc::SIGUSR1).unwrap();
        }
    })
    .unwrap();

    // Queue more deliveries than the callback allows; the surplus bytes
    // find no registered entry and are discarded.
    for _ in 0..12 {
        raise(libc::SIGUSR1);
    }

    let _stop = ev
        .add_timer(Duration::from_millis(100), |ev| ev.shutdown())
        .unwrap();
    ev.run().unwrap();

    assert_eq!(seen.get(), 10);
    assert!(disposition_is_default(libc::SIGUSR1));
}

#[test]
fn slot_is_exclusive_until_owner_drops() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut owner = init_with_loop();
    let mut other = init_with_loop();

    owner.add_signal(libc::SIGUSR2, |_, _| {}).unwrap();

    // Every signal operation from another loop fails while the slot is
    // held.
    assert!(other.add_signal(libc::SIGUSR2, |_, _| {}).is_err());
    assert!(other.del_signal(libc::SIGUSR2).is_err());

    // Dropping the owner restores dispositions and frees the slot.
    drop(owner);
    assert!(disposition_is_default(libc::SIGUSR2));
    assert!(other.add_signal(libc::SIGUSR2, |_, _| {}).is_ok());
    other.del_signal(libc::SIGUSR2).unwrap();
}

#[test]
fn rejects_out_of_range_signals() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut ev = init_with_loop();

    assert!(ev.add_signal(-1, |_, _| {}).is_err());
    assert!(ev.add_signal(evloop::NSIG, |_, _| {}).is_err());
    assert!(ev.del_signal(-1).is_err());
    assert!(ev.del_signal(evloop::NSIG).is_err());
}

#[test]
fn signal_wakes_an_idle_loop() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut ev = init_with_loop();

    let seen = Rc::new(Cell::new(false));
    let seen_in_cb = Rc::clone(&seen);
    ev.add_signal(libc::SIGUSR1, move |ev, _| {
        seen_in_cb.set(true);
        ev.del_signal(libc::SIGUSR1).unwrap();
        ev.shutdown();
    })
    .unwrap();

    // Delivered from a prepare hook: the signal arrives while the loop
    // is about to sleep and must wake it through the self-pipe.
    let hook = ev
        .add_prepare(|_| raise(libc::SIGUSR1))
        .unwrap();

    let _stop = ev
        .add_timer(Duration::from_secs(5), |ev| ev.shutdown())
        .unwrap();
    ev.run().unwrap();
    ev.del_prepare(hook);

    assert!(seen.get());
}
