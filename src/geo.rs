//! Optional geolocation capability. The core only defines the seam; a real
//! provider (MaxMind, ip-api, ...) plugs in from outside.

use serde::Serialize;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoInfo {
    Known { country: String, city: String, isp: String },
    Unknown,
}

#[async_trait::async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> GeoInfo;
}

/// Default provider: everything is Unknown.
pub struct NoGeo;

#[async_trait::async_trait]
impl GeoLookup for NoGeo {
    async fn lookup(&self, _ip: IpAddr) -> GeoInfo {
        GeoInfo::Unknown
    }
}
