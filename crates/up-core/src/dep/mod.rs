//! Package dependency resolution and caching.

pub mod cache;
pub mod fetcher;
pub mod manager;
pub mod marshaler;
pub mod resolver;

pub use cache::{Cache, CacheEvent, LocalCache};
pub use fetcher::{Fetcher, FsFetcher, RegistryFetcher};
pub use manager::{Manager, View};
pub use marshaler::{ImageMeta, ImageWithMeta, Marshaler, PackageRef, ParsedPackage, XpkgMarshaler, parse_stream};
pub use resolver::{ImageResolver, Resolver};
