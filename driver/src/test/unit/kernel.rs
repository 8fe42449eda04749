use crate::test::setup;
use crate::{Driver, Error, HostDriver, KernelArg, MemFlags, NullHandles, QueueProperties, RawMem};

fn vector_add() -> HostDriver {
    HostDriver::builder()
        .kernel("vector_add", 3, |item| {
            let i = item.global_id(0);
            let sum = item.load::<f32>(0, i)? + item.load::<f32>(1, i)?;
            item.store(2, i, sum)
        })
        .build()
}

#[test]
fn test_unknown_kernel_name() {
    let driver = vector_add();
    let (context, _queue) = setup(&driver, QueueProperties::empty());
    assert_eq!(driver.create_kernel(context, "vector_mul").unwrap_err(), Error::InvalidKernelName);
}

#[test]
fn test_vector_add() {
    let driver = vector_add();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let a: Vec<f32> = (0..64).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..64).map(|i| (i * 2) as f32).collect();

    let buffer = |data: &[f32]| {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        driver.create_buffer(context, MemFlags::READ_ONLY | MemFlags::COPY_HOST_PTR, bytes.len(), Some(bytes)).unwrap()
    };
    let (a_mem, b_mem) = (buffer(&a), buffer(&b));
    let out = driver.create_buffer(context, MemFlags::WRITE_ONLY, 64 * 4, None).unwrap();

    let kernel = driver.create_kernel(context, "vector_add").unwrap();
    for (index, mem) in [a_mem, b_mem, out].into_iter().enumerate() {
        driver.set_kernel_arg(kernel, index as u32, KernelArg::Mem(mem)).unwrap();
    }
    driver.enqueue_nd_range_kernel(queue, kernel, None, &[64], Some([16].as_slice()), &[]).unwrap();

    let mut result = vec![0f32; 64];
    let bytes: &mut [u8] = bytemuck::cast_slice_mut::<f32, u8>(&mut result);
    unsafe { driver.enqueue_read_buffer(queue, out, true, 0, bytes.as_mut_ptr(), bytes.len(), &[]).unwrap() };
    let expected: Vec<f32> = (0..64).map(|i| (i * 3) as f32).collect();
    assert_eq!(result, expected);
}

#[test]
fn test_launch_validation() {
    let driver = vector_add();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let kernel = driver.create_kernel(context, "vector_add").unwrap();

    assert_eq!(driver.set_kernel_arg(kernel, 3, KernelArg::value(&1u32)).unwrap_err(), Error::InvalidArgIndex);
    assert_eq!(driver.set_kernel_arg(kernel, 0, KernelArg::Mem(RawMem::NULL)).unwrap_err(), Error::InvalidMemObject);
    let err = driver.enqueue_nd_range_kernel(queue, kernel, None, &[64], None, &[]).unwrap_err();
    assert_eq!(err, Error::InvalidKernelArgs);

    let mem = driver.create_buffer(context, MemFlags::READ_WRITE, 16, None).unwrap();
    for index in 0..3 {
        driver.set_kernel_arg(kernel, index, KernelArg::Mem(mem)).unwrap();
    }
    let err = driver.enqueue_nd_range_kernel(queue, kernel, None, &[64], Some([7].as_slice()), &[]).unwrap_err();
    assert_eq!(err, Error::InvalidWorkGroupSize);
    let err = driver.enqueue_nd_range_kernel(queue, kernel, None, &[1, 1, 1, 1], None, &[]).unwrap_err();
    assert_eq!(err, Error::InvalidWorkDimension);
}

#[test]
fn test_arguments_are_captured_at_enqueue() {
    let driver = HostDriver::builder()
        .kernel("fill", 2, |item| {
            let value: u32 = item.scalar(1)?;
            item.store(0, item.global_id(0), value)
        })
        .build();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    let mem = driver.create_buffer(context, MemFlags::READ_WRITE, 16, None).unwrap();
    let kernel = driver.create_kernel(context, "fill").unwrap();

    driver.set_kernel_arg(kernel, 0, KernelArg::Mem(mem)).unwrap();
    driver.set_kernel_arg(kernel, 1, KernelArg::value(&7u32)).unwrap();
    driver.enqueue_nd_range_kernel(queue, kernel, None, &[4], None, &[]).unwrap();
    driver.set_kernel_arg(kernel, 1, KernelArg::value(&9u32)).unwrap();
    driver.finish(queue).unwrap();

    let mut out = [0u8; 16];
    unsafe { driver.enqueue_read_buffer(queue, mem, true, 0, out.as_mut_ptr(), 16, &[]).unwrap() };
    assert_eq!(bytemuck::pod_collect_to_vec::<u8, u32>(&out), [7, 7, 7, 7]);
}

#[test]
fn test_register_kernel_at_runtime() {
    let driver = HostDriver::new();
    let (context, queue) = setup(&driver, QueueProperties::empty());
    assert!(driver.create_kernel(context, "late").is_err());

    driver.register_kernel("late", 0, |_| Ok(()));
    let kernel = driver.create_kernel(context, "late").unwrap();
    driver.enqueue_task(queue, kernel, &[]).unwrap();
    driver.finish(queue).unwrap();
    driver.release_kernel(kernel).unwrap();
    assert_eq!(driver.stats().kernels, 0);
}

#[test]
fn test_null_kernel_contract() {
    let driver = HostDriver::builder().null_handles(NullHandles::KERNEL).build();
    driver.register_kernel("noop", 0, |_| Ok(()));
    let (context, _queue) = setup(&driver, QueueProperties::empty());
    assert!(driver.create_kernel(context, "noop").unwrap().is_null());
}
