use crate::test::setup;
use crate::types::{ChannelOrder, ChannelType};
use crate::{
    Driver, Error, HostDriver, ImageDesc, ImageFormat, MapFlags, MemFlags, NullHandles, Pitch, QueueProperties,
};

fn rgba8() -> ImageFormat {
    ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnormInt8)
}

#[test]
fn test_buffer_host_data_rules() {
    let driver = HostDriver::new();
    let (context, _queue) = setup(&driver, QueueProperties::empty());

    let err = driver.create_buffer(context, MemFlags::READ_WRITE, 0, None).unwrap_err();
    assert_eq!(err, Error::InvalidBufferSize);
    let err = driver.create_buffer(context, MemFlags::COPY_HOST_PTR, 8, None).unwrap_err();
    assert_eq!(err, Error::InvalidHostPtr);
    let err = driver.create_buffer(context, MemFlags::READ_WRITE, 8, Some([0; 8].as_slice())).unwrap_err();
    assert_eq!(err, Error::InvalidHostPtr);
    let err = driver.create_buffer(context, MemFlags::COPY_HOST_PTR, 8, Some([0; 4].as_slice())).unwrap_err();
    assert_eq!(err, Error::InvalidHostPtr);

    driver.create_buffer(context, MemFlags::COPY_HOST_PTR, 8, Some([1; 8].as_slice())).unwrap();
    assert_eq!(driver.stats().memory_in_use, 8);
}

#[test]
fn test_memory_limit() {
    let driver = HostDriver::builder().memory_limit(1024).build();
    let (context, _queue) = setup(&driver, QueueProperties::empty());

    let first = driver.create_buffer(context, MemFlags::READ_WRITE, 1000, None).unwrap();
    let err = driver.create_buffer(context, MemFlags::READ_WRITE, 100, None).unwrap_err();
    assert_eq!(err, Error::MemObjectAllocationFailure);

    driver.release_mem_object(first).unwrap();
    assert_eq!(driver.stats().memory_in_use, 0);
    driver.create_buffer(context, MemFlags::READ_WRITE, 100, None).unwrap();
}

#[test]
fn test_write_then_read() {
    let driver = HostDriver::new();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let mem = driver.create_buffer(context, MemFlags::READ_WRITE, 16, None).unwrap();

    let src: Vec<u8> = (0..8).collect();
    let mut dst = [0u8; 8];
    unsafe {
        let write = driver.enqueue_write_buffer(queue, mem, true, 4, src.as_ptr(), src.len(), &[]).unwrap();
        let read = driver.enqueue_read_buffer(queue, mem, true, 4, dst.as_mut_ptr(), dst.len(), &[]).unwrap();
        driver.release_event(write).unwrap();
        driver.release_event(read).unwrap();
    }
    assert_eq!(dst.as_slice(), src.as_slice());

    let err = unsafe { driver.enqueue_read_buffer(queue, mem, true, 12, dst.as_mut_ptr(), dst.len(), &[]) };
    assert!(matches!(err, Err(Error::InvalidValue { .. })));
}

#[test]
fn test_copy_buffer() {
    let driver = HostDriver::new();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let data: Vec<u8> = (0..16).collect();
    let src = driver.create_buffer(context, MemFlags::COPY_HOST_PTR, 16, Some(data.as_slice())).unwrap();
    let dst = driver.create_buffer(context, MemFlags::READ_WRITE, 16, None).unwrap();

    driver.enqueue_copy_buffer(queue, src, dst, 0, 8, 8, &[]).unwrap();
    driver.enqueue_copy_buffer(queue, src, src, 0, 8, 8, &[]).unwrap();
    assert_eq!(driver.enqueue_copy_buffer(queue, src, src, 0, 4, 8, &[]).unwrap_err(), Error::MemCopyOverlap);
    driver.finish(queue).unwrap();

    let mut out = [0u8; 16];
    unsafe { driver.enqueue_read_buffer(queue, dst, true, 0, out.as_mut_ptr(), 16, &[]).unwrap() };
    assert_eq!(&out[8..], &data[..8]);
    unsafe { driver.enqueue_read_buffer(queue, src, true, 0, out.as_mut_ptr(), 16, &[]).unwrap() };
    assert_eq!(&out[8..], &data[..8]);
}

#[test]
fn test_map_buffer_round_trip() {
    let driver = HostDriver::new();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let data = [5u8; 32];
    let mem = driver.create_buffer(context, MemFlags::COPY_HOST_PTR, 32, Some(data.as_slice())).unwrap();

    let flags = MapFlags::READ | MapFlags::WRITE;
    let region = driver.enqueue_map_buffer(queue, mem, true, flags, 8, 8, &[]).unwrap();
    assert!(!region.ptr.is_null());
    assert_eq!(region.pitch, Pitch { row_pitch: 8, slice_pitch: 8 });

    let window = unsafe { std::slice::from_raw_parts_mut(region.ptr, 8) };
    assert_eq!(window, &[5; 8]);
    window.fill(9);
    driver.enqueue_unmap_mem_object(queue, mem, region.ptr, &[]).unwrap();

    let mut out = [0u8; 32];
    unsafe { driver.enqueue_read_buffer(queue, mem, true, 0, out.as_mut_ptr(), 32, &[]).unwrap() };
    assert_eq!(&out[..8], &[5; 8]);
    assert_eq!(&out[8..16], &[9; 8]);
    assert_eq!(&out[16..], &[5; 16]);
}

#[test]
fn test_read_only_map_does_not_write_back() {
    let driver = HostDriver::new();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let mem = driver.create_buffer(context, MemFlags::COPY_HOST_PTR, 4, Some([1, 2, 3, 4].as_slice())).unwrap();

    let region = driver.enqueue_map_buffer(queue, mem, true, MapFlags::READ, 0, 4, &[]).unwrap();
    unsafe { std::slice::from_raw_parts_mut(region.ptr, 4).fill(0) };
    driver.enqueue_unmap_mem_object(queue, mem, region.ptr, &[]).unwrap();

    let mut out = [0u8; 4];
    unsafe { driver.enqueue_read_buffer(queue, mem, true, 0, out.as_mut_ptr(), 4, &[]).unwrap() };
    assert_eq!(out, [1, 2, 3, 4]);
}

#[test]
fn test_unmap_validation() {
    let driver = HostDriver::new();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let other = driver.create_command_queue(context, driver.devices()[0], QueueProperties::empty()).unwrap();
    let mem = driver.create_buffer(context, MemFlags::READ_WRITE, 8, None).unwrap();

    let region = driver.enqueue_map_buffer(queue, mem, true, MapFlags::WRITE, 0, 8, &[]).unwrap();
    let mut stray = [0u8; 8];
    let err = driver.enqueue_unmap_mem_object(queue, mem, stray.as_mut_ptr(), &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidValue { .. }));
    let err = driver.enqueue_unmap_mem_object(other, mem, region.ptr, &[]).unwrap_err();
    assert_eq!(err, Error::InvalidCommandQueue);

    driver.enqueue_unmap_mem_object(queue, mem, region.ptr, &[]).unwrap();
    driver.finish(queue).unwrap();
}

#[test]
fn test_null_map_contract() {
    let driver = HostDriver::builder().null_handles(NullHandles::MAP).build();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let mem = driver.create_buffer(context, MemFlags::READ_WRITE, 8, None).unwrap();

    let region = driver.enqueue_map_buffer(queue, mem, true, MapFlags::READ, 0, 8, &[]).unwrap();
    assert!(region.ptr.is_null());
    assert!(!region.event.is_null());
    driver.release_event(region.event).unwrap();
}

#[test]
fn test_image_validation() {
    let driver = HostDriver::builder().image_formats([rgba8()]).build();
    let (context, _queue) = setup(&driver, QueueProperties::empty());

    let float = ImageFormat::new(ChannelOrder::R, ChannelType::Float);
    let err = driver.create_image(context, MemFlags::READ_WRITE, float, ImageDesc::new_2d(4, 4)).unwrap_err();
    assert_eq!(err, Error::InvalidImageFormatDescriptor);
    let err = driver.create_image(context, MemFlags::READ_WRITE, rgba8(), ImageDesc::new_2d(0, 4)).unwrap_err();
    assert_eq!(err, Error::InvalidImageSize);

    driver.create_image(context, MemFlags::READ_WRITE, rgba8(), ImageDesc::new_3d(4, 4, 2)).unwrap();
    assert_eq!(driver.stats().memory_in_use, 4 * 4 * 4 * 2);
}

#[test]
fn test_image_map_pitches() {
    let driver = HostDriver::new();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let mem = driver.create_image(context, MemFlags::READ_WRITE, rgba8(), ImageDesc::new_3d(8, 8, 4)).unwrap();

    let region = driver.enqueue_map_image(queue, mem, true, MapFlags::WRITE, [2, 2, 1], [3, 2, 2], &[]).unwrap();
    assert_eq!(region.pitch, Pitch { row_pitch: 12, slice_pitch: 24 });
    driver.enqueue_unmap_mem_object(queue, mem, region.ptr, &[]).unwrap();

    let err = driver.enqueue_map_image(queue, mem, true, MapFlags::READ, [6, 0, 0], [3, 1, 1], &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidValue { .. }));
    driver.finish(queue).unwrap();
}

#[test]
fn test_image_transfer_with_host_pitch() {
    let driver = HostDriver::new();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let format = ImageFormat::new(ChannelOrder::R, ChannelType::UnsignedInt8);
    let mem = driver.create_image(context, MemFlags::READ_WRITE, format, ImageDesc::new_2d(4, 4)).unwrap();

    // Two rows of two pixels, stored with a host row pitch of three bytes.
    let src = [1u8, 2, 0, 3, 4];
    let pitch = Pitch { row_pitch: 3, slice_pitch: 0 };
    unsafe {
        let (origin, region) = ([1, 1, 0], [2, 2, 1]);
        driver.enqueue_write_image(queue, mem, true, origin, region, pitch, src.as_ptr(), src.len(), &[]).unwrap();
    }

    let mut whole = [0u8; 16];
    unsafe {
        let region = [4, 4, 1];
        driver
            .enqueue_read_image(queue, mem, true, [0, 0, 0], region, Pitch::default(), whole.as_mut_ptr(), 16, &[])
            .unwrap();
    }
    assert_eq!(whole, [0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0, 0, 0, 0, 0]);

    let short = unsafe {
        let region = [4, 4, 1];
        driver.enqueue_read_image(queue, mem, true, [0, 0, 0], region, Pitch::default(), whole.as_mut_ptr(), 8, &[])
    };
    assert!(matches!(short, Err(Error::InvalidValue { .. })));
}
