//! Spatial index over the user's stored gyms.
//!
//! Each gym's detection circle is approximated by a lat/lng bounding box in
//! an R-tree. Point queries hit the tree first and then confirm with the
//! exact haversine distance.

use std::collections::HashMap;

use log::debug;
use rstar::{RTree, RTreeObject, AABB};

use crate::geo_utils::{self, METERS_PER_DEGREE};
use crate::{Coordinate, GymProfile};

// Slack on the box so the degree approximation never clips the circle
const ENVELOPE_MARGIN: f64 = 1.1;

/// Bounding box of one gym's detection circle.
#[derive(Debug, Clone)]
struct TargetBounds {
    gym_id: String,
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl TargetBounds {
    fn for_gym(gym: &GymProfile) -> Self {
        let center = gym.target.coordinates;
        let lat_delta = gym.target.radius_meters / METERS_PER_DEGREE * ENVELOPE_MARGIN;
        let min_lat = (center.latitude - lat_delta).max(-90.0);
        let max_lat = (center.latitude + lat_delta).min(90.0);

        // Longitude degrees shrink with latitude; use the box edge nearest a pole
        let widest = min_lat.abs().max(max_lat.abs());
        let cos_lat = widest.to_radians().cos();
        let (min_lng, max_lng) = if cos_lat < 1e-6 {
            (-180.0, 180.0)
        } else {
            let lng_delta = lat_delta / cos_lat;
            let lo = center.longitude - lng_delta;
            let hi = center.longitude + lng_delta;
            if lo < -180.0 || hi > 180.0 {
                // Crosses the antimeridian
                (-180.0, 180.0)
            } else {
                (lo, hi)
            }
        };

        Self {
            gym_id: gym.id.clone(),
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }
}

impl RTreeObject for TargetBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

/// Stored gyms, queryable by "which detection circles contain this point".
#[derive(Default)]
pub struct TargetIndex {
    gyms: HashMap<String, GymProfile>,
    spatial_index: RTree<TargetBounds>,
}

impl TargetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_gyms(gyms: impl IntoIterator<Item = GymProfile>) -> Self {
        let mut index = Self::new();
        for gym in gyms {
            index.gyms.insert(gym.id.clone(), gym);
        }
        index.rebuild();
        index
    }

    fn rebuild(&mut self) {
        let bounds: Vec<TargetBounds> = self.gyms.values().map(TargetBounds::for_gym).collect();
        self.spatial_index = RTree::bulk_load(bounds);
        debug!("[TargetIndex] Indexed {} gyms", self.gyms.len());
    }

    /// Add or replace a gym.
    pub fn insert(&mut self, gym: GymProfile) {
        self.gyms.insert(gym.id.clone(), gym);
        self.rebuild();
    }

    pub fn remove(&mut self, gym_id: &str) -> Option<GymProfile> {
        let removed = self.gyms.remove(gym_id);
        if removed.is_some() {
            self.rebuild();
        }
        removed
    }

    pub fn get(&self, gym_id: &str) -> Option<&GymProfile> {
        self.gyms.get(gym_id)
    }

    pub fn len(&self) -> usize {
        self.gyms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gyms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GymProfile> {
        self.gyms.values()
    }

    /// Gyms whose detection circle contains `location`, closest first.
    pub fn find_containing(&self, location: &Coordinate) -> Vec<(&GymProfile, f64)> {
        let probe = AABB::from_point([location.longitude, location.latitude]);
        let mut hits: Vec<(&GymProfile, f64)> = self
            .spatial_index
            .locate_in_envelope_intersecting(&probe)
            .filter_map(|b| self.gyms.get(&b.gym_id))
            .filter_map(|gym| {
                let distance = geo_utils::distance_meters(location, &gym.target.coordinates);
                (distance <= gym.target.radius_meters).then_some((gym, distance))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    /// Closest gym regardless of radius.
    pub fn nearest(&self, location: &Coordinate) -> Option<(&GymProfile, f64)> {
        self.gyms
            .values()
            .map(|gym| (gym, geo_utils::distance_meters(location, &gym.target.coordinates)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}
