use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;

use callisto_core::seqwrite::MemoryGate;

#[test]
fn unlimited_gate_admits_without_counting() {
    let gate = MemoryGate::new();
    for _ in 0..3 {
        gate.wait_for_memory();
    }
    assert_eq!(gate.active_blocks(), 0);
    for _ in 0..3 {
        gate.release_memory();
    }
    assert_eq!(gate.active_blocks(), 0);
}

#[test]
fn gate_blocks_at_ceiling_until_release() {
    let gate = Arc::new(MemoryGate::new());
    gate.set_max_active_blocks(2);
    gate.wait_for_memory();
    gate.wait_for_memory();

    let (tx, rx) = unbounded();
    let waiter_gate = Arc::clone(&gate);
    let waiter = thread::spawn(move || {
        waiter_gate.wait_for_memory();
        tx.send(()).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    gate.release_memory();
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    waiter.join().unwrap();
    assert_eq!(gate.active_blocks(), 2);
}

#[test]
fn raising_ceiling_admits_exactly_the_difference() {
    let gate = Arc::new(MemoryGate::new());
    gate.set_max_active_blocks(1);
    gate.wait_for_memory();

    let (tx, rx) = unbounded();
    let mut waiters = Vec::new();
    for _ in 0..3 {
        let waiter_gate = Arc::clone(&gate);
        let tx = tx.clone();
        waiters.push(thread::spawn(move || {
            waiter_gate.wait_for_memory();
            tx.send(()).unwrap();
        }));
    }
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    // 1 -> 3 admits two of the three waiters
    gate.set_max_active_blocks(3);
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(gate.active_blocks(), 3);

    gate.release_memory();
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(gate.active_blocks(), 3);
}

#[test]
fn lowering_ceiling_keeps_claimed_blocks() {
    let gate = Arc::new(MemoryGate::new());
    gate.set_max_active_blocks(3);
    for _ in 0..3 {
        gate.wait_for_memory();
    }

    gate.set_max_active_blocks(1);
    assert_eq!(gate.active_blocks(), 3);

    let (tx, rx) = unbounded();
    let waiter_gate = Arc::clone(&gate);
    let waiter = thread::spawn(move || {
        waiter_gate.wait_for_memory();
        tx.send(()).unwrap();
    });

    // claimed blocks must drain below the new ceiling first
    gate.release_memory();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    gate.release_memory();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    gate.release_memory();
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    waiter.join().unwrap();
    assert_eq!(gate.active_blocks(), 1);
}

#[test]
fn unlimited_reset_wakes_all_waiters() {
    let gate = Arc::new(MemoryGate::new());
    gate.set_max_active_blocks(1);
    gate.wait_for_memory();

    let (tx, rx) = unbounded();
    let mut waiters = Vec::new();
    for _ in 0..2 {
        let waiter_gate = Arc::clone(&gate);
        let tx = tx.clone();
        waiters.push(thread::spawn(move || {
            waiter_gate.wait_for_memory();
            tx.send(()).unwrap();
        }));
    }
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    gate.set_max_active_blocks(0);
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    for waiter in waiters {
        waiter.join().unwrap();
    }
    // the block claimed under the old ceiling stays counted
    assert_eq!(gate.active_blocks(), 1);
}

#[test]
fn single_output_releases_directly() {
    let gate = MemoryGate::new();
    gate.set_max_active_blocks(4);
    gate.set_number_of_outputs(1);
    let id = gate.allocate_output_id();

    for _ in 0..3 {
        gate.wait_for_memory();
    }
    gate.notify_frame_freed(id, 0);
    gate.notify_frame_freed(id, 1);
    assert_eq!(gate.active_blocks(), 1);
}

#[test]
fn fan_out_waits_for_the_slowest_output() {
    let gate = MemoryGate::new();
    gate.set_max_active_blocks(10);
    gate.set_number_of_outputs(2);
    let fast = gate.allocate_output_id();
    let slow = gate.allocate_output_id();

    for _ in 0..10 {
        gate.wait_for_memory();
    }
    assert_eq!(gate.active_blocks(), 10);

    // one output finishing everything releases nothing on its own
    for index in 0..10 {
        gate.notify_frame_freed(fast, index);
    }
    assert_eq!(gate.active_blocks(), 10);

    for index in 0..4 {
        gate.notify_frame_freed(slow, index);
    }
    assert_eq!(gate.active_blocks(), 6);

    for index in 4..10 {
        gate.notify_frame_freed(slow, index);
    }
    assert_eq!(gate.active_blocks(), 0);
}

#[test]
fn undeclared_extra_output_releases_directly() {
    let gate = MemoryGate::new();
    gate.set_max_active_blocks(4);
    gate.set_number_of_outputs(2);
    let a = gate.allocate_output_id();
    let b = gate.allocate_output_id();
    let extra = gate.allocate_output_id();

    for _ in 0..3 {
        gate.wait_for_memory();
    }

    gate.notify_frame_freed(a, 0);
    assert_eq!(gate.active_blocks(), 3);
    gate.notify_frame_freed(b, 0);
    assert_eq!(gate.active_blocks(), 2);

    // no slot left for a third output, it falls back to a direct release
    gate.notify_frame_freed(extra, 0);
    assert_eq!(gate.active_blocks(), 1);
}
