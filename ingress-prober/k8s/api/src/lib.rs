#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ingress;
pub mod labels;

pub use self::{
    ingress::{Ingress, IngressRule, IngressSpec, IngressVisibility},
    labels::{Labels, Selector},
};
pub use k8s_openapi::api::{
    self,
    core::v1::{Pod, PodCondition, PodSpec, PodStatus},
};
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    runtime::watcher,
    Client,
};
