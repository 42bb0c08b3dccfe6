//! Emissions estimation boundary.
//!
//! The core never computes carbon itself; it hands total transfer size
//! and a hosting signal to an [`EmissionsModel`]. The default follows the
//! sustainable-web-design approach: transfer volume to energy, energy to
//! CO2e through a grid intensity, with green hosting discounting the
//! data-center share.

use std::collections::HashSet;

/// Pure mapping from transfer volume to grams of CO2e.
pub trait EmissionsModel: Send + Sync {
    fn estimate(&self, transferred_bytes: u64, green_hosting: bool) -> f64;
}

/// Tells whether a host is served from renewable-powered infrastructure.
pub trait GreenHostingCheck: Send + Sync {
    fn is_green(&self, host: &str) -> bool;
}

const BYTES_PER_GB: f64 = 1_000_000_000.0;

#[derive(Clone, Debug)]
pub struct SustainableWebModel {
    /// Operational energy per gigabyte transferred, in kWh.
    pub kwh_per_gb: f64,
    /// Global average grid intensity, grams CO2e per kWh.
    pub grid_intensity: f64,
    /// Intensity applied to the data-center share under green hosting.
    pub renewable_intensity: f64,
    /// Fraction of the energy attributed to the data center.
    pub datacenter_share: f64,
}

impl Default for SustainableWebModel {
    fn default() -> Self {
        Self {
            kwh_per_gb: 0.81,
            grid_intensity: 442.0,
            renewable_intensity: 50.0,
            datacenter_share: 0.15,
        }
    }
}

impl EmissionsModel for SustainableWebModel {
    fn estimate(&self, transferred_bytes: u64, green_hosting: bool) -> f64 {
        let energy_kwh = transferred_bytes as f64 / BYTES_PER_GB * self.kwh_per_gb;
        let intensity = if green_hosting {
            self.grid_intensity * (1.0 - self.datacenter_share)
                + self.renewable_intensity * self.datacenter_share
        } else {
            self.grid_intensity
        };
        energy_kwh * intensity
    }
}

/// Green-hosting lookup backed by a fixed host list. Suffix matching so
/// `cdn.example.org` is covered by an `example.org` entry.
#[derive(Debug, Default)]
pub struct StaticGreenHosting {
    hosts: HashSet<String>,
}

impl StaticGreenHosting {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

impl GreenHostingCheck for StaticGreenHosting {
    fn is_green(&self, host: &str) -> bool {
        self.hosts.iter().any(|green| {
            host == green || host.ends_with(&format!(".{green}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_bytes_is_zero_grams() {
        let model = SustainableWebModel::default();
        assert_eq!(model.estimate(0, false), 0.0);
        assert_eq!(model.estimate(0, true), 0.0);
    }

    #[test]
    fn one_gigabyte_matches_reference_figures() {
        let model = SustainableWebModel::default();
        let grams = model.estimate(1_000_000_000, false);
        assert!((grams - 0.81 * 442.0).abs() < 1e-6);
    }

    #[test]
    fn green_hosting_lowers_the_estimate() {
        let model = SustainableWebModel::default();
        let grey = model.estimate(5_000_000, false);
        let green = model.estimate(5_000_000, true);
        assert!(green < grey);
        assert!(green > 0.0);
    }

    #[test]
    fn static_check_matches_hosts_and_subdomains() {
        let check = StaticGreenHosting::new(["example.org"]);
        assert!(check.is_green("example.org"));
        assert!(check.is_green("cdn.example.org"));
        assert!(!check.is_green("notexample.org"));
        assert!(!check.is_green("example.com"));
    }
}
