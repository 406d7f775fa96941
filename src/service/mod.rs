// Service description
//
// What a provider advertises: identity, endpoint, capabilities and load.

pub mod descriptor;
pub mod load;

pub use descriptor::{
    CapabilitySpec, CapabilityStatus, ServiceDescriptor, ServiceStatus, SettingDescriptor,
    SettingKind, SharedDescriptor,
};
pub use load::current_load;
