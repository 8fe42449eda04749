use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use gantry_driver::HostDriver;
use gantry_driver::host::OUT_OF_BOUNDS_ACCESS;

use crate::test::{assert_all_released, setup};
use crate::{ErrorKind, EventStatus, MemFlags, QueueProperties};

fn sleeper() -> HostDriver {
    HostDriver::builder()
        .kernel("sleep", 0, |_| {
            thread::sleep(Duration::from_millis(3));
            Ok(())
        })
        .build()
}

#[test]
fn test_queue_release_is_idempotent() {
    let host = HostDriver::new();
    let (context, mut queue) = setup(&host, QueueProperties::empty());
    let device = queue.device();
    assert_eq!(device, host.devices()[0]);

    queue.release();
    queue.release();
    assert!(queue.is_released());
    assert_eq!(queue.enqueue_marker(&[]).unwrap_err().kind(), ErrorKind::Released);
    assert_eq!(queue.flush().unwrap_err().kind(), ErrorKind::Released);
    assert_eq!(queue.finish().unwrap_err().kind(), ErrorKind::Released);

    drop(queue);
    drop(context);
    assert_all_released(&host);
}

#[test]
fn test_flush_does_not_wait() {
    let host = HostDriver::new();
    let (_context, queue) = setup(&host, QueueProperties::empty());

    let marker = queue.enqueue_marker(&[]).unwrap();
    thread::sleep(Duration::from_millis(5));
    assert_eq!(marker.status().unwrap(), EventStatus::Queued);

    queue.flush().unwrap();
    marker.wait().unwrap();
    assert_eq!(marker.status().unwrap(), EventStatus::Complete);
}

#[test]
fn test_wait_issues_pending_commands() {
    let host = HostDriver::new();
    let (_context, queue) = setup(&host, QueueProperties::empty());

    let marker = queue.enqueue_marker(&[]).unwrap();
    marker.wait().unwrap();
    assert_eq!(marker.status().unwrap(), EventStatus::Complete);
}

#[test]
fn test_dependency_orders_out_of_order_queue() {
    let host = sleeper();
    let properties = QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE | QueueProperties::PROFILING_ENABLE;
    let (context, queue) = setup(&host, properties);
    let kernel = context.create_kernel("sleep").unwrap();

    let first = queue.enqueue_task(&kernel, &[]).unwrap();
    let second = queue.enqueue_task(&kernel, &[&first]).unwrap();
    queue.finish().unwrap();

    let (first, second) = (first.profiling().unwrap(), second.profiling().unwrap());
    assert!(first.queued <= first.submit && first.submit <= first.start && first.start <= first.end);
    assert!(second.start >= first.end);
    assert!(second.end >= first.end);
}

#[test]
fn test_in_order_queue_runs_in_submission_order() {
    let host = sleeper();
    let (context, queue) = setup(&host, QueueProperties::PROFILING_ENABLE);
    let kernel = context.create_kernel("sleep").unwrap();

    let events: Vec<_> = (0..4).map(|_| queue.enqueue_task(&kernel, &[]).unwrap()).collect();
    queue.finish().unwrap();

    let times: Vec<_> = events.iter().map(|event| event.profiling().unwrap()).collect();
    for pair in times.windows(2) {
        assert!(pair[1].start >= pair[0].end);
    }
}

#[test]
fn test_user_event_gates_dependents() {
    let host = HostDriver::new();
    let (context, queue) = setup(&host, QueueProperties::empty());
    let gate = context.create_user_event().unwrap();

    let marker = queue.enqueue_marker(&[&gate]).unwrap();
    queue.flush().unwrap();
    thread::sleep(Duration::from_millis(10));
    assert_eq!(gate.status().unwrap(), EventStatus::Submitted);
    assert_eq!(marker.status().unwrap(), EventStatus::Submitted);

    gate.set_complete().unwrap();
    queue.finish().unwrap();
    assert_eq!(marker.status().unwrap(), EventStatus::Complete);
}

#[test]
fn test_failed_dependency_fails_command() {
    let host = HostDriver::new();
    let (context, queue) = setup(&host, QueueProperties::empty());
    let gate = context.create_user_event().unwrap();

    let marker = queue.enqueue_marker(&[&gate]).unwrap();
    gate.set_error(-77).unwrap();

    let err = marker.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceSideFailure);
    assert_eq!(err.driver_error(), Some(gantry_driver::Error::ExecStatusErrorForEventsInWaitList));

    let err = queue.finish().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceSideFailure);
    queue.finish().unwrap();
}

#[test]
fn test_finish_reports_device_failure() {
    let host = HostDriver::builder().kernel("overrun", 1, |item| item.store(0, 64, 1.0f32)).build();
    let (context, queue) = setup(&host, QueueProperties::empty());
    let buffer = context.create_empty_buffer(MemFlags::READ_WRITE, 16).unwrap();
    let kernel = context.create_kernel("overrun").unwrap();
    kernel.set_arg_mem(0, &buffer).unwrap();

    let event = queue.enqueue_task(&kernel, &[]).unwrap();
    let err = queue.finish().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceSideFailure);
    assert_eq!(err.driver_error(), Some(gantry_driver::Error::DeviceFailure { code: OUT_OF_BOUNDS_ACCESS }));

    let err = event.wait().unwrap_err();
    assert_eq!(err.driver_error(), Some(gantry_driver::Error::DeviceFailure { code: OUT_OF_BOUNDS_ACCESS }));
}

#[test]
fn test_marker_covers_earlier_commands() {
    let host = sleeper();
    let properties = QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE | QueueProperties::PROFILING_ENABLE;
    let (context, queue) = setup(&host, properties);
    let kernel = context.create_kernel("sleep").unwrap();

    let tasks: Vec<_> = (0..3).map(|_| queue.enqueue_task(&kernel, &[]).unwrap()).collect();
    let marker = queue.enqueue_marker(&[]).unwrap();
    marker.wait().unwrap();

    let end = marker.profiling().unwrap().end;
    for task in &tasks {
        assert_eq!(task.status().unwrap(), EventStatus::Complete);
        assert!(task.profiling().unwrap().end <= end);
    }
}

#[test]
fn test_released_dependency_is_rejected() {
    let host = HostDriver::new();
    let (context, queue) = setup(&host, QueueProperties::empty());
    let mut gate = context.create_user_event().unwrap();
    gate.release();

    let err = queue.enqueue_marker(&[&gate]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Released);
    assert_eq!(host.stats().events, 0);
}

#[test]
fn test_released_queue_drains() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let host = HostDriver::builder()
        .kernel("count", 0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();
    let (context, mut queue) = setup(&host, QueueProperties::empty());
    let kernel = context.create_kernel("count").unwrap();

    let events: Vec<_> = (0..5).map(|_| queue.enqueue_task(&kernel, &[]).unwrap()).collect();
    queue.release();
    crate::Event::wait_all(&events.iter().collect::<Vec<_>>()).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[test]
fn test_dependency_across_queues() {
    let host = HostDriver::builder().devices(2).build();
    let (context, first) = setup(&host, QueueProperties::empty());
    let second = context.create_command_queue(host.devices()[1], QueueProperties::empty()).unwrap();
    let buffer = context.create_empty_buffer(MemFlags::READ_WRITE, 4).unwrap();

    let data = [7u8; 4];
    let write = unsafe { first.enqueue_write_buffer(&buffer, false, 0, &data, &[]) }.unwrap();
    let mut out = [0u8; 4];
    unsafe { second.enqueue_read_buffer(&buffer, true, 0, &mut out, &[&write]) }.unwrap();
    assert_eq!(out, data);
    assert_eq!(write.status().unwrap(), EventStatus::Complete);
}
