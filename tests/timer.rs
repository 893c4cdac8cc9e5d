mod util;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use evloop::Timer;

use util::init_with_loop;

#[test]
fn recurring_timer_fires_until_cancelled() {
    let mut ev = init_with_loop();

    let fired = Rc::new(Cell::new(0));
    let handle: Rc<RefCell<Option<Timer>>> = Rc::new(RefCell::new(None));

    let seen = Rc::clone(&fired);
    let held = Rc::clone(&handle);
    let timer = ev
        .add_timer(Duration::from_millis(10), move |ev| {
            seen.set(seen.get() + 1);
            if seen.get() == 3 {
                let timer = held.borrow_mut().take().unwrap();
                ev.del_timer(&timer).unwrap();
                ev.shutdown();
            }
        })
        .unwrap();
    *handle.borrow_mut() = Some(timer);

    ev.run().unwrap();
    assert_eq!(fired.get(), 3);
}

#[test]
fn timer_cascade_fires_each_exactly_once() {
    const TIMERS: usize = 20;

    let mut ev = init_with_loop();

    let fired = Rc::new(RefCell::new(vec![0u32; TIMERS]));
    let handles: Rc<RefCell<Vec<Option<Timer>>>> =
        Rc::new(RefCell::new(Vec::with_capacity(TIMERS)));

    for i in 0..TIMERS {
        let fired = Rc::clone(&fired);
        let handles_for_closure = Rc::clone(&handles);
        let timer = ev
            .add_timer(Duration::from_millis(10 * (i as u64 + 1)), move |ev| {
                fired.borrow_mut()[i] += 1;
                let timer = handles_for_closure.borrow_mut()[i].take().unwrap();
                ev.del_timer(&timer).unwrap();
                if fired.borrow().iter().all(|&n| n > 0) {
                    ev.shutdown();
                }
            })
            .unwrap();
        handles.borrow_mut().push(Some(timer));
    }

    ev.run().unwrap();
    assert!(fired.borrow().iter().all(|&n| n == 1));
}

#[test]
fn timers_fire_in_deadline_order() {
    let mut ev = init_with_loop();

    let order = Rc::new(RefCell::new(Vec::new()));
    let handles: Rc<RefCell<Vec<Option<Timer>>>> = Rc::new(RefCell::new(Vec::new()));

    // Register out of order; delivery must follow the deadlines.
    for (slot, interval) in [(0usize, 30u64), (1, 10), (2, 20)] {
        let order = Rc::clone(&order);
        let handles_for_closure = Rc::clone(&handles);
        let timer = ev
            .add_timer(Duration::from_millis(interval), move |ev| {
                order.borrow_mut().push(interval);
                let timer = handles_for_closure.borrow_mut()[slot].take().unwrap();
                ev.del_timer(&timer).unwrap();
                if order.borrow().len() == 3 {
                    ev.shutdown();
                }
            })
            .unwrap();
        handles.borrow_mut().push(Some(timer));
    }

    ev.run().unwrap();
    assert_eq!(*order.borrow(), vec![10, 20, 30]);
}

#[test]
fn cancelling_twice_fails_without_corruption() {
    let mut ev = init_with_loop();

    let doomed = ev.add_timer(Duration::from_millis(10), |_| {}).unwrap();
    assert!(ev.del_timer(&doomed).is_ok());
    assert!(ev.del_timer(&doomed).is_err());

    // The schedule still works after the failed second delete.
    let fired = Rc::new(Cell::new(false));
    let seen = Rc::clone(&fired);
    let _guard = ev
        .add_timer(Duration::from_millis(10), move |ev| {
            seen.set(true);
            ev.shutdown();
        })
        .unwrap();
    ev.run().unwrap();
    assert!(fired.get());
}

#[test]
fn nearby_timer_bounds_the_wait() {
    let mut ev = init_with_loop();

    let start = Instant::now();
    let _timer = ev
        .add_timer(Duration::from_millis(50), move |ev| ev.shutdown())
        .unwrap();
    ev.run().unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(40), "woke early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "woke late: {:?}", elapsed);
}
