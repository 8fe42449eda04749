use crate::types::{ChannelOrder, ChannelType};
use crate::{
    ContextProperty, DeviceId, Driver, Error, GraphicsResource, HostDriver, ImageFormat, MemFlags, MemObjectType,
    NullHandles, QueueProperties, RawContext,
};

#[test]
fn test_create_and_release_context() {
    let driver = HostDriver::builder().devices(2).build();
    let context = driver.create_context(driver.devices(), None).unwrap();
    assert!(!context.is_null());
    assert_eq!(driver.stats().contexts, 1);

    driver.release_context(context).unwrap();
    assert_eq!(driver.stats().contexts, 0);
    assert_eq!(driver.release_context(context).unwrap_err(), Error::InvalidContext);
    assert_eq!(driver.stats().rejected_releases, 1);
}

#[test]
fn test_unknown_device() {
    let driver = HostDriver::builder().devices(1).build();
    let err = driver.create_context(&[DeviceId::from_raw(42)], None).unwrap_err();
    assert_eq!(err, Error::InvalidDevice);
    assert!(driver.create_context(&[], None).is_err());
}

#[test]
fn test_unknown_property() {
    let driver = HostDriver::new();
    let properties = [ContextProperty::new(0xdead, 1)];
    let err = driver.create_context(driver.devices(), Some(properties.as_slice())).unwrap_err();
    assert_eq!(err, Error::InvalidProperty);
}

#[test]
fn test_children_keep_context_alive() {
    let driver = HostDriver::new();
    let device = driver.devices()[0];
    let context = driver.create_context(&[device], None).unwrap();
    let queue = driver.create_command_queue(context, device, QueueProperties::empty()).unwrap();
    let mem = driver.create_buffer(context, MemFlags::READ_WRITE, 16, None).unwrap();

    driver.release_context(context).unwrap();
    assert_eq!(driver.stats().contexts, 1);

    driver.release_command_queue(queue).unwrap();
    assert_eq!(driver.stats().contexts, 1);
    driver.release_mem_object(mem).unwrap();
    assert_eq!(driver.stats().live_handles(), 0);
}

#[test]
fn test_queue_device_must_belong_to_context() {
    let driver = HostDriver::builder().devices(2).build();
    let [first, second] = [driver.devices()[0], driver.devices()[1]];
    let context = driver.create_context(&[first], None).unwrap();

    let err = driver.create_command_queue(context, second, QueueProperties::empty()).unwrap_err();
    assert_eq!(err, Error::InvalidDevice);
    let err = driver.create_command_queue(RawContext::NULL, first, QueueProperties::empty()).unwrap_err();
    assert_eq!(err, Error::InvalidContext);
}

#[test]
fn test_null_context_contract() {
    let driver = HostDriver::builder().null_handles(NullHandles::CONTEXT).build();
    let context = driver.create_context(driver.devices(), None).unwrap();
    assert!(context.is_null());
    assert_eq!(driver.stats().contexts, 0);
}

#[test]
fn test_supported_image_formats_reports_total() {
    let driver = HostDriver::new();
    let context = driver.create_context(driver.devices(), None).unwrap();
    let expected = 10 * 12;

    let mut none: [ImageFormat; 0] = [];
    let total =
        driver.supported_image_formats(context, MemFlags::READ_ONLY, MemObjectType::Image2d, &mut none).unwrap();
    assert_eq!(total, expected);

    let placeholder = ImageFormat::new(ChannelOrder::R, ChannelType::UnormInt8);
    let mut few = [placeholder; 4];
    let total = driver.supported_image_formats(context, MemFlags::READ_ONLY, MemObjectType::Image3d, &mut few).unwrap();
    assert_eq!(total, expected);

    let err = driver.supported_image_formats(context, MemFlags::READ_ONLY, MemObjectType::Buffer, &mut few);
    assert!(err.is_err());
}

#[test]
fn test_graphics_memory_requires_sharing_context() {
    let resource = GraphicsResource::RenderBuffer(3);
    let driver = HostDriver::builder().graphics_resource(resource, 64).build();

    let plain = driver.create_context(driver.devices(), None).unwrap();
    let err = driver.create_from_graphics_resource(plain, MemFlags::READ_WRITE, resource).unwrap_err();
    assert_eq!(err, Error::InvalidContext);

    let properties = [ContextProperty::new(ContextProperty::GL_CONTEXT, 0x51)];
    let shared = driver.create_context(driver.devices(), Some(properties.as_slice())).unwrap();
    let mem = driver.create_from_graphics_resource(shared, MemFlags::READ_WRITE, resource).unwrap();
    assert!(!mem.is_null());
    // Graphics memory belongs to the graphics API, not the device budget.
    assert_eq!(driver.stats().memory_in_use, 0);

    let err = driver.create_from_graphics_resource(shared, MemFlags::READ_WRITE, GraphicsResource::Texture2d(9));
    assert_eq!(err.unwrap_err(), Error::InvalidGlObject);
}
