//! OCI images: references, the in-memory image model, a registry client and
//! the on-disk tarball and layout formats.

pub mod auth;
pub mod client;
pub mod image;
pub mod layout;
pub mod reference;
pub mod tarball;

pub use client::{RawManifest, RegistryClient};
pub use image::{ConfigFile, Descriptor, Image, ImageIndex, Layer, Manifest, media_types};
pub use reference::Reference;
