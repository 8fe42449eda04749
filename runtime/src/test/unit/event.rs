use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use gantry_driver::HostDriver;
use parking_lot::Mutex;

use crate::test::{assert_all_released, setup};
use crate::{ErrorKind, Event, EventStatus, QueueProperties};

#[test]
fn test_event_release_is_idempotent() {
    let host = HostDriver::new();
    let (context, queue) = setup(&host, QueueProperties::empty());
    let mut marker = queue.enqueue_marker(&[]).unwrap();
    let mut user = context.create_user_event().unwrap();

    marker.release();
    marker.release();
    user.release();
    assert!(marker.is_released() && user.is_released());
    assert_eq!(marker.status().unwrap_err().kind(), ErrorKind::Released);
    assert_eq!(user.set_complete().unwrap_err().kind(), ErrorKind::Released);
    assert_eq!(marker.wait().unwrap_err().kind(), ErrorKind::Released);

    queue.finish().unwrap();
    drop((marker, user, queue, context));
    assert_all_released(&host);
}

#[test]
fn test_release_does_not_cancel() {
    let host = HostDriver::new();
    let (context, queue) = setup(&host, QueueProperties::empty());
    let gate = context.create_user_event().unwrap();
    let mut marker = queue.enqueue_marker(&[&gate]).unwrap();
    let done = queue.enqueue_marker(&[]).unwrap();

    marker.release();
    gate.set_complete().unwrap();
    done.wait().unwrap();
    assert_eq!(done.status().unwrap(), EventStatus::Complete);
}

#[test]
fn test_user_event_completion_rules() {
    let host = HostDriver::new();
    let (context, queue) = setup(&host, QueueProperties::empty());
    let user = context.create_user_event().unwrap();
    assert_eq!(user.status().unwrap(), EventStatus::Submitted);

    user.set_complete().unwrap();
    assert_eq!(user.status().unwrap(), EventStatus::Complete);
    let err = user.set_error(-5).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationFailure);

    let marker = queue.enqueue_marker(&[]).unwrap();
    let err = marker.set_complete().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationFailure);
    assert_eq!(err.driver_error(), Some(gantry_driver::Error::InvalidOperation));

    let other = context.create_user_event().unwrap();
    let err = other.set_error(5).unwrap_err();
    assert!(matches!(err.driver_error(), Some(gantry_driver::Error::InvalidValue { .. })));
}

#[test]
fn test_user_event_error_surfaces_on_wait() {
    let host = HostDriver::new();
    let (context, _queue) = setup(&host, QueueProperties::empty());
    let user = context.create_user_event().unwrap();
    user.set_error(-1234).unwrap();

    let err = user.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceSideFailure);
    assert_eq!(err.driver_error(), Some(gantry_driver::Error::DeviceFailure { code: -1234 }));
}

#[test]
fn test_profiling_availability() {
    let host = HostDriver::new();
    let (context, plain) = setup(&host, QueueProperties::empty());
    let profiled = context.create_command_queue(host.devices()[0], QueueProperties::PROFILING_ENABLE).unwrap();

    let marker = plain.enqueue_marker(&[]).unwrap();
    marker.wait().unwrap();
    let err = marker.profiling().unwrap_err();
    assert_eq!(err.driver_error(), Some(gantry_driver::Error::ProfilingInfoNotAvailable));

    let user = context.create_user_event().unwrap();
    user.set_complete().unwrap();
    assert!(user.profiling().is_err());

    let marker = profiled.enqueue_marker(&[]).unwrap();
    marker.wait().unwrap();
    let info = marker.profiling().unwrap();
    assert!(info.queued <= info.submit && info.submit <= info.start && info.start <= info.end);
}

#[test]
fn test_on_complete_runs_once() {
    let host = HostDriver::new();
    let (context, _queue) = setup(&host, QueueProperties::empty());
    let user = context.create_user_event().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    user.on_complete(move |status| sink.lock().push(status)).unwrap();
    assert!(seen.lock().is_empty());

    user.set_error(-3).unwrap();
    assert_eq!(*seen.lock(), vec![EventStatus::Error(-3)]);

    // Registered after completion: runs right away.
    let (tx, rx) = mpsc::channel();
    user.on_complete(move |status| tx.send(status).unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), EventStatus::Error(-3));
}

#[test]
fn test_wait_all() {
    let host = HostDriver::new();
    let (context, queue) = setup(&host, QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE);
    let gate = context.create_user_event().unwrap();
    let markers: Vec<Event> = (0..3).map(|_| queue.enqueue_marker(&[&gate]).unwrap()).collect();
    queue.flush().unwrap();

    let waiter = std::thread::spawn(move || {
        let refs: Vec<&Event> = markers.iter().collect();
        Event::wait_all(&refs)
    });
    std::thread::sleep(Duration::from_millis(10));
    assert!(!waiter.is_finished());

    gate.set_complete().unwrap();
    waiter.join().unwrap().unwrap();
    Event::wait_all(&[]).unwrap();
}
