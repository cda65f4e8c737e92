//! USB 2.0 protocol data types: SETUP packets and descriptor builders.
//!
//! Serialization writes into `&[Cell<u8>]` scratch buffers so builders can be
//! driven from the shared, interior-mutable engine state without `&mut`
//! plumbing through the event callbacks.

use core::cell::Cell;

use crate::hil::{endpoint_address, TransferDirection, TransferType};
use crate::utilities::cells::VolatileCell;

/// An 8-byte buffer, aligned for controllers that DMA descriptors directly.
#[repr(align(4))]
pub struct Buffer8 {
    pub buf: [VolatileCell<u8>; 8],
}

impl Default for Buffer8 {
    fn default() -> Self {
        Self {
            buf: core::array::from_fn(|_| VolatileCell::new(0)),
        }
    }
}

/// The data structure sent in a SETUP handshake.
#[derive(Debug, Copy, Clone)]
pub struct SetupData {
    pub request_type: DeviceRequestType,
    pub request_code: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupData {
    /// Create a `SetupData` structure from a packet received from the wire.
    pub fn get(p: &[VolatileCell<u8>]) -> Option<Self> {
        if p.len() < 8 {
            return None;
        }
        Some(SetupData {
            request_type: DeviceRequestType(p[0].get()),
            request_code: p[1].get(),
            value: get_u16(p[2].get(), p[3].get()),
            index: get_u16(p[4].get(), p[5].get()),
            length: get_u16(p[6].get(), p[7].get()),
        })
    }

    /// If the `SetupData` represents a standard request, return it.
    pub fn get_standard_request(&self) -> Option<StandardRequest> {
        match self.request_type.request_type() {
            RequestType::Standard => match self.request_code {
                0 => Some(StandardRequest::GetStatus {
                    recipient_index: self.index,
                }),
                1 => Some(StandardRequest::ClearFeature {
                    feature: FeatureSelector::get(self.value),
                    recipient_index: self.index,
                }),
                3 => Some(StandardRequest::SetFeature {
                    feature: FeatureSelector::get(self.value),
                    test_mode: (self.index >> 8) as u8,
                    recipient_index: self.index & 0xff,
                }),
                5 => Some(StandardRequest::SetAddress {
                    device_address: self.value,
                }),
                6 => Some(StandardRequest::GetDescriptor {
                    descriptor_type: (self.value >> 8) as u8,
                    descriptor_index: (self.value & 0xff) as u8,
                    lang_id: self.index,
                    requested_length: self.length,
                }),
                7 => Some(StandardRequest::SetDescriptor {
                    descriptor_type: (self.value >> 8) as u8,
                    descriptor_index: (self.value & 0xff) as u8,
                    lang_id: self.index,
                    descriptor_length: self.length,
                }),
                8 => Some(StandardRequest::GetConfiguration),
                9 => Some(StandardRequest::SetConfiguration {
                    configuration_value: (self.value & 0xff) as u8,
                }),
                10 => Some(StandardRequest::GetInterface {
                    interface: self.index,
                }),
                11 => Some(StandardRequest::SetInterface {
                    interface: self.index,
                    alternate_setting: (self.value & 0xff) as u8,
                }),
                12 => Some(StandardRequest::SynchFrame {
                    endpoint: self.index as u8,
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum StandardRequest {
    GetStatus {
        recipient_index: u16,
    },
    ClearFeature {
        feature: FeatureSelector,
        recipient_index: u16,
    },
    SetFeature {
        feature: FeatureSelector,
        test_mode: u8,
        recipient_index: u16,
    },
    SetAddress {
        device_address: u16,
    },
    /// The descriptor type travels as the raw wValue high byte: class- and
    /// vendor-specific types are resolved by the owning configuration item,
    /// so the engine cannot enumerate them up front.
    GetDescriptor {
        descriptor_type: u8,
        descriptor_index: u8,
        lang_id: u16,
        requested_length: u16,
    },
    SetDescriptor {
        descriptor_type: u8,
        descriptor_index: u8,
        lang_id: u16,
        descriptor_length: u16,
    },
    GetConfiguration,
    SetConfiguration {
        configuration_value: u8,
    },
    GetInterface {
        interface: u16,
    },
    SetInterface {
        interface: u16,
        alternate_setting: u8,
    },
    SynchFrame {
        endpoint: u8,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    InterfaceAssociation = 11,
    Bos = 15,
    DeviceCapability = 16,
    Hid = 0x21,
    Report = 0x22,
    CsInterface = 0x24,
}

impl DescriptorType {
    pub fn from_byte(byte: u8) -> Option<DescriptorType> {
        match byte {
            1 => Some(DescriptorType::Device),
            2 => Some(DescriptorType::Configuration),
            3 => Some(DescriptorType::String),
            4 => Some(DescriptorType::Interface),
            5 => Some(DescriptorType::Endpoint),
            6 => Some(DescriptorType::DeviceQualifier),
            7 => Some(DescriptorType::OtherSpeedConfiguration),
            8 => Some(DescriptorType::InterfacePower),
            11 => Some(DescriptorType::InterfaceAssociation),
            15 => Some(DescriptorType::Bos),
            16 => Some(DescriptorType::DeviceCapability),
            0x21 => Some(DescriptorType::Hid),
            0x22 => Some(DescriptorType::Report),
            0x24 => Some(DescriptorType::CsInterface),
            _ => None,
        }
    }
}

#[derive(Copy, Clone)]
pub struct DeviceRequestType(pub u8);

impl DeviceRequestType {
    pub fn new(
        direction: TransferDirection,
        request_type: RequestType,
        recipient: Recipient,
    ) -> Self {
        DeviceRequestType(
            ((direction as u8) << 7)
                | (match request_type {
                    RequestType::Standard => 0,
                    RequestType::Class => 1,
                    RequestType::Vendor => 2,
                    RequestType::Reserved => 3,
                } << 5)
                | match recipient {
                    Recipient::Device => 0,
                    Recipient::Interface => 1,
                    Recipient::Endpoint => 2,
                    Recipient::Other => 3,
                    Recipient::Reserved => 4,
                },
        )
    }

    pub fn transfer_direction(self) -> TransferDirection {
        match self.0 & (1 << 7) {
            0 => TransferDirection::HostToDevice,
            _ => TransferDirection::DeviceToHost,
        }
    }

    pub fn request_type(self) -> RequestType {
        match (self.0 & (0b11 << 5)) >> 5 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(self) -> Recipient {
        match self.0 & 0b11111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }
}

impl core::fmt::Debug for DeviceRequestType {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{{{:?}, {:?}, {:?}}}",
            self.transfer_direction(),
            self.request_type(),
            self.recipient()
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FeatureSelector {
    EndpointHalt,
    DeviceRemoteWakeup,
    TestMode,
    Unknown,
}

impl FeatureSelector {
    pub fn get(value: u16) -> Self {
        match value {
            0 => FeatureSelector::EndpointHalt,
            1 => FeatureSelector::DeviceRemoteWakeup,
            2 => FeatureSelector::TestMode,
            _ => FeatureSelector::Unknown,
        }
    }
}

pub trait Descriptor {
    /// Serialized size of the descriptor.
    fn size(&self) -> usize;

    /// Serialize the descriptor to a buffer for transmission on the bus.
    fn write_to(&self, buf: &[Cell<u8>]) -> usize {
        if self.size() > buf.len() {
            0
        } else {
            self.write_to_unchecked(buf)
        }
    }

    /// Same as `write_to()`, but doesn't check that `buf` is long enough
    /// before indexing into it. This should be used only if the result of
    /// `size()` is first consulted.
    fn write_to_unchecked(&self, buf: &[Cell<u8>]) -> usize;
}

pub struct DeviceDescriptor {
    /// Valid values include 0x0100 (USB1.0), 0x0110 (USB1.1) and 0x0200 (USB2.0)
    pub usb_release: u16,

    /// 0x00 means each interface defines its own class.
    /// 0xFF means the class behavior is defined by the vendor.
    /// All other values have meaning assigned by USB-IF
    pub class: u8,

    /// Assigned by USB-IF if `class` is
    pub subclass: u8,

    /// Assigned by USB-IF if `class` is
    pub protocol: u8,

    /// Max packet size for endpoint 0. Must be 8, 16, 32 or 64
    pub max_packet_size_ep0: u8,

    /// Obtained from USB-IF
    pub vendor_id: u16,

    /// Together with `vendor_id`, this must be unique to the product
    pub product_id: u16,

    /// Device release number in binary coded decimal (BCD)
    pub device_release: u16,

    /// Index of the string descriptor describing manufacturer, or 0 if none
    pub manufacturer_string: u8,

    /// Index of the string descriptor describing product, or 0 if none
    pub product_string: u8,

    /// Index of the string descriptor giving device serial number, or 0 if none
    pub serial_number_string: u8,

    /// Number of configurations the device supports. Must be at least one
    pub num_configurations: u8,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        DeviceDescriptor {
            usb_release: 0x0200,
            class: 0,
            subclass: 0,
            protocol: 0,
            max_packet_size_ep0: 64,
            vendor_id: 0x6667,
            product_id: 0xabcd,
            device_release: 0x0001,
            manufacturer_string: 1,
            product_string: 2,
            serial_number_string: 3,
            num_configurations: 1,
        }
    }
}

impl DeviceDescriptor {
    /// Check static validity of the release/packet-size combination. A bad
    /// combination is an integration bug, not a host condition, so this
    /// panics rather than returning an error.
    pub fn validate(&self) {
        assert!(
            matches!(self.max_packet_size_ep0, 8 | 16 | 32 | 64),
            "EP0 max packet size must be 8, 16, 32 or 64"
        );
        assert!(
            matches!(self.usb_release, 0x0100 | 0x0110 | 0x0200),
            "unsupported bcdUSB value"
        );
        // USB 1.0 low-speed devices are limited to 8-byte control packets.
        assert!(
            self.usb_release != 0x0100 || self.max_packet_size_ep0 == 8,
            "USB 1.0 devices must use an 8-byte EP0"
        );
        assert!(self.num_configurations >= 1);
    }
}

impl Descriptor for DeviceDescriptor {
    fn size(&self) -> usize {
        18
    }

    fn write_to_unchecked(&self, buf: &[Cell<u8>]) -> usize {
        buf[0].set(18); // Size of descriptor
        buf[1].set(DescriptorType::Device as u8);
        put_u16(&buf[2..4], self.usb_release);
        buf[4].set(self.class);
        buf[5].set(self.subclass);
        buf[6].set(self.protocol);
        buf[7].set(self.max_packet_size_ep0);
        put_u16(&buf[8..10], self.vendor_id);
        put_u16(&buf[10..12], self.product_id);
        put_u16(&buf[12..14], self.device_release);
        buf[14].set(self.manufacturer_string);
        buf[15].set(self.product_string);
        buf[16].set(self.serial_number_string);
        buf[17].set(self.num_configurations);
        18
    }
}

/// The 9-byte configuration descriptor header. The interface, class and
/// endpoint blocks that follow it on the wire are contributed by
/// configuration items and concatenated by the configuration manager.
pub struct ConfigurationDescriptor {
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub string_index: u8,
    pub attributes: ConfigurationAttributes,
    pub max_power: u8, // in 2mA units
    pub related_descriptor_length: usize,
}

impl Default for ConfigurationDescriptor {
    fn default() -> Self {
        ConfigurationDescriptor {
            num_interfaces: 1,
            configuration_value: 1,
            string_index: 0,
            attributes: ConfigurationAttributes::new(true, false),
            max_power: 0,
            related_descriptor_length: 0,
        }
    }
}

impl Descriptor for ConfigurationDescriptor {
    fn size(&self) -> usize {
        9
    }

    fn write_to_unchecked(&self, buf: &[Cell<u8>]) -> usize {
        let total = 9 + self.related_descriptor_length;
        // The wTotalLength field is 16 bits; overflowing it is a static
        // configuration bug.
        assert!(total <= u16::MAX as usize);
        buf[0].set(9); // Size of descriptor
        buf[1].set(DescriptorType::Configuration as u8);
        put_u16(&buf[2..4], total as u16);
        buf[4].set(self.num_interfaces);
        buf[5].set(self.configuration_value);
        buf[6].set(self.string_index);
        buf[7].set(From::from(self.attributes));
        buf[8].set(self.max_power);
        9
    }
}

#[derive(Copy, Clone)]
pub struct ConfigurationAttributes(u8);

impl ConfigurationAttributes {
    pub fn new(is_self_powered: bool, supports_remote_wakeup: bool) -> Self {
        ConfigurationAttributes(
            (1 << 7)
                | if is_self_powered { 1 << 6 } else { 0 }
                | if supports_remote_wakeup { 1 << 5 } else { 0 },
        )
    }
}

impl From<ConfigurationAttributes> for u8 {
    fn from(ca: ConfigurationAttributes) -> u8 {
        ca.0
    }
}

pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub string_index: u8,
}

impl Default for InterfaceDescriptor {
    fn default() -> Self {
        InterfaceDescriptor {
            interface_number: 0,
            alternate_setting: 0,
            num_endpoints: 0, // (excluding default control endpoint)
            interface_class: 0xff, // vendor specific
            interface_subclass: 0,
            interface_protocol: 0,
            string_index: 0,
        }
    }
}

impl Descriptor for InterfaceDescriptor {
    fn size(&self) -> usize {
        9
    }

    fn write_to_unchecked(&self, buf: &[Cell<u8>]) -> usize {
        buf[0].set(9); // Size of descriptor
        buf[1].set(DescriptorType::Interface as u8);
        buf[2].set(self.interface_number);
        buf[3].set(self.alternate_setting);
        buf[4].set(self.num_endpoints);
        buf[5].set(self.interface_class);
        buf[6].set(self.interface_subclass);
        buf[7].set(self.interface_protocol);
        buf[8].set(self.string_index);
        9
    }
}

/// Groups the interfaces of one logical function of a composite device so
/// the host binds a single driver to all of them.
pub struct InterfaceAssociationDescriptor {
    pub first_interface: u8,
    pub interface_count: u8,
    pub function_class: u8,
    pub function_subclass: u8,
    pub function_protocol: u8,
    pub string_index: u8,
}

impl Descriptor for InterfaceAssociationDescriptor {
    fn size(&self) -> usize {
        8
    }

    fn write_to_unchecked(&self, buf: &[Cell<u8>]) -> usize {
        buf[0].set(8);
        buf[1].set(DescriptorType::InterfaceAssociation as u8);
        buf[2].set(self.first_interface);
        buf[3].set(self.interface_count);
        buf[4].set(self.function_class);
        buf[5].set(self.function_subclass);
        buf[6].set(self.function_protocol);
        buf[7].set(self.string_index);
        8
    }
}

pub struct EndpointDescriptor {
    pub endpoint_number: u8,
    pub direction: TransferDirection,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    /// Poll for device data every `interval` frames.
    pub interval: u8,
}

impl Descriptor for EndpointDescriptor {
    fn size(&self) -> usize {
        7
    }

    fn write_to_unchecked(&self, buf: &[Cell<u8>]) -> usize {
        let len = self.size();
        buf[0].set(len as u8);
        buf[1].set(DescriptorType::Endpoint as u8);
        buf[2].set(endpoint_address(self.endpoint_number, self.direction));
        // The below implicitly sets Synchronization Type to "No
        // Synchronization" and Usage Type to "Data endpoint"
        buf[3].set(self.transfer_type as u8);
        put_u16(&buf[4..6], self.max_packet_size & 0x7ff);
        buf[6].set(self.interval);
        len
    }
}

pub struct LanguagesDescriptor<'a> {
    pub langs: &'a [u16],
}

impl Descriptor for LanguagesDescriptor<'_> {
    fn size(&self) -> usize {
        2 + (2 * self.langs.len())
    }

    fn write_to_unchecked(&self, buf: &[Cell<u8>]) -> usize {
        let len = self.size();
        buf[0].set(len as u8);
        buf[1].set(DescriptorType::String as u8);
        for (i, lang) in self.langs.iter().enumerate() {
            put_u16(&buf[2 + (2 * i)..4 + (2 * i)], *lang);
        }
        len
    }
}

pub struct StringDescriptor<'a> {
    pub string: &'a str,
}

impl StringDescriptor<'_> {
    /// Only Basic Multilingual Plane code points survive encoding; 4-byte
    /// UTF-8 sequences are dropped. Carried over from the original stack as
    /// a documented limitation.
    fn bmp_chars(&self) -> impl Iterator<Item = char> + '_ {
        self.string.chars().filter(|ch| ch.len_utf16() == 1)
    }
}

impl Descriptor for StringDescriptor<'_> {
    fn size(&self) -> usize {
        2 + 2 * self.bmp_chars().count()
    }

    // Encode as UTF-16LE
    fn write_to_unchecked(&self, buf: &[Cell<u8>]) -> usize {
        buf[1].set(DescriptorType::String as u8);
        let mut i = 2;
        for ch in self.bmp_chars() {
            put_u16(&buf[i..i + 2], ch as u16);
            i += 2;
        }
        buf[0].set(i as u8);
        i
    }
}

/// Parse a `u16` from two bytes as received on the bus.
pub fn get_u16(b0: u8, b1: u8) -> u16 {
    (b0 as u16) | ((b1 as u16) << 8)
}

/// Write a `u16` to a buffer for transmission on the bus.
pub fn put_u16(buf: &[Cell<u8>], n: u16) {
    buf[0].set((n & 0xff) as u8);
    buf[1].set((n >> 8) as u8);
}
