//! Rancher implementation of the quota gateway.

pub mod client;
pub mod kube;
pub mod wire;

pub use client::{RancherClient, RancherOptions};
