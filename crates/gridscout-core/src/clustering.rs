//! Cluster discovery: DBSCAN over building centroids plus the spatial
//! qualification filters.
//!
//! A building qualifies when it is far enough from the national grid and
//! either sits on an island or lies within a kilometer of a road. Qualified
//! centroids are clustered with DBSCAN in degree space (eps converted from
//! meters with the ~111 km/degree approximation), clusters wider than the
//! configured diameter are discarded, and candidates too close to an already
//! existing minigrid are filtered out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{ClusterBuilding, ClusterCandidate, ClusteringOutcome, ExplorationParameters};
use crate::error::Result;

/// Meters per degree of latitude, the flat-earth approximation used to
/// convert the DBSCAN radius into degree space
const METERS_PER_DEGREE: f64 = 111_000.0;

/// Buildings not on an island must be within this distance of a road
const ROAD_DISTANCE_MAX_M: f64 = 1_000.0;

/// Default DBSCAN neighborhood radius in meters
pub const DEFAULT_EPS_METERS: f64 = 300.0;

/// One building centroid with the attributes the qualification filters need
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingSite {
    pub building_id: i64,
    pub province: String,
    pub building_type: String,
    pub surface: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    /// Distance to the national grid, meters
    pub distance_to_grid_m: f64,
    /// Distance to the nearest road, meters
    pub distance_to_road_m: f64,
    pub is_island: bool,
}

/// An already operating minigrid; candidates near one are filtered out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingMinigrid {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Clustering collaborator invoked once per exploration
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn discover(&self, parameters: &ExplorationParameters) -> Result<ClusteringOutcome>;
}

/// DBSCAN-based [`ClusterSource`] over an in-memory building catalogue
pub struct DbscanClusterSource {
    sites: Vec<BuildingSite>,
    existing_minigrids: Vec<ExistingMinigrid>,
    eps_meters: f64,
}

impl DbscanClusterSource {
    pub fn new(sites: Vec<BuildingSite>, existing_minigrids: Vec<ExistingMinigrid>) -> Self {
        Self {
            sites,
            existing_minigrids,
            eps_meters: DEFAULT_EPS_METERS,
        }
    }

    pub fn with_eps_meters(mut self, eps_meters: f64) -> Self {
        self.eps_meters = eps_meters;
        self
    }
}

#[async_trait]
impl ClusterSource for DbscanClusterSource {
    async fn discover(&self, parameters: &ExplorationParameters) -> Result<ClusteringOutcome> {
        let qualified: Vec<&BuildingSite> = self
            .sites
            .iter()
            .filter(|site| {
                site.distance_to_grid_m >= parameters.distance_from_grid_min
                    && (site.is_island || site.distance_to_road_m < ROAD_DISTANCE_MAX_M)
            })
            .collect();
        debug!(
            total = self.sites.len(),
            qualified = qualified.len(),
            "building qualification filter applied"
        );

        let points: Vec<(f64, f64)> = qualified
            .iter()
            .map(|site| (site.latitude, site.longitude))
            .collect();
        let eps_deg = self.eps_meters / METERS_PER_DEGREE;
        let labels = dbscan(&points, eps_deg, parameters.consumer_count_min as usize);

        // Group members per label, drop noise
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut label_slots: std::collections::HashMap<i64, usize> =
            std::collections::HashMap::new();
        for (idx, label) in labels.iter().enumerate() {
            if *label < 0 {
                continue;
            }
            let slot = *label_slots.entry(*label).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(idx);
        }

        // Diameter filter in real meters
        let mut valid_groups: Vec<Vec<usize>> = Vec::new();
        for members in groups {
            if members.len() < 2 {
                continue;
            }
            let diameter = max_pairwise_distance_m(&members, &points);
            if diameter <= parameters.diameter_max {
                valid_groups.push(members);
            } else {
                debug!(
                    members = members.len(),
                    diameter_m = diameter,
                    "cluster exceeds the diameter limit, discarded"
                );
            }
        }
        let clusters_found = valid_groups.len() as i64;

        let mut candidates = Vec::new();
        let mut next_cluster_id: i64 = 1;
        for members in valid_groups {
            let n = members.len() as f64;
            let latitude = members.iter().map(|&i| points[i].0).sum::<f64>() / n;
            let longitude = members.iter().map(|&i| points[i].1).sum::<f64>() / n;

            let near_existing = self.existing_minigrids.iter().any(|mg| {
                haversine_m((latitude, longitude), (mg.latitude, mg.longitude))
                    < parameters.match_distance_max
            });
            if near_existing {
                debug!(latitude, longitude, "candidate matches an existing minigrid, skipped");
                continue;
            }

            let surfaces: Vec<f64> = members
                .iter()
                .filter_map(|&i| qualified[i].surface)
                .collect();
            let avg_surface = if surfaces.is_empty() {
                0.0
            } else {
                surfaces.iter().sum::<f64>() / surfaces.len() as f64
            };
            let avg_distance_to_road_m = members
                .iter()
                .map(|&i| qualified[i].distance_to_road_m)
                .sum::<f64>()
                / n;

            let first = qualified[members[0]];
            candidates.push(ClusterCandidate {
                cluster_id: next_cluster_id,
                province: first.province.clone(),
                num_buildings: members.len() as i64,
                distance_to_grid_m: first.distance_to_grid_m,
                avg_distance_to_road_m,
                avg_surface,
                eps_meters: self.eps_meters,
                diameter_km: parameters.diameter_max / 1_000.0,
                grid_distance_km: parameters.distance_from_grid_min / 1_000.0,
                latitude,
                longitude,
                buildings: members
                    .iter()
                    .map(|&i| {
                        let site = qualified[i];
                        ClusterBuilding {
                            building_id: site.building_id,
                            building_type: site.building_type.clone(),
                            surface: site.surface,
                            latitude: site.latitude,
                            longitude: site.longitude,
                        }
                    })
                    .collect(),
            });
            next_cluster_id += 1;
        }

        info!(
            clusters_found,
            candidates = candidates.len(),
            "cluster discovery complete"
        );
        Ok(ClusteringOutcome {
            clusters_found,
            candidates,
        })
    }
}

/// Plain DBSCAN over 2D points with euclidean distance. Returns one label per
/// point, -1 for noise. The neighborhood count includes the point itself.
fn dbscan(points: &[(f64, f64)], eps: f64, min_samples: usize) -> Vec<i64> {
    const UNVISITED: i64 = -2;
    const NOISE: i64 = -1;

    let mut labels = vec![UNVISITED; points.len()];
    let mut cluster: i64 = 0;

    for idx in 0..points.len() {
        if labels[idx] != UNVISITED {
            continue;
        }
        let neighbors = region_query(points, idx, eps);
        if neighbors.len() < min_samples {
            labels[idx] = NOISE;
            continue;
        }

        labels[idx] = cluster;
        let mut seeds = neighbors;
        let mut cursor = 0;
        while cursor < seeds.len() {
            let current = seeds[cursor];
            cursor += 1;
            if labels[current] == NOISE {
                labels[current] = cluster;
            }
            if labels[current] != UNVISITED {
                continue;
            }
            labels[current] = cluster;
            let current_neighbors = region_query(points, current, eps);
            if current_neighbors.len() >= min_samples {
                seeds.extend(current_neighbors);
            }
        }
        cluster += 1;
    }
    labels
}

fn region_query(points: &[(f64, f64)], idx: usize, eps: f64) -> Vec<usize> {
    let (x, y) = points[idx];
    points
        .iter()
        .enumerate()
        .filter(|(_, (px, py))| {
            let dx = px - x;
            let dy = py - y;
            (dx * dx + dy * dy).sqrt() <= eps
        })
        .map(|(i, _)| i)
        .collect()
}

fn max_pairwise_distance_m(members: &[usize], points: &[(f64, f64)]) -> f64 {
    let mut max = 0.0_f64;
    for (pos, &a) in members.iter().enumerate() {
        for &b in &members[pos + 1..] {
            let d = haversine_m(points[a], points[b]);
            if d > max {
                max = d;
            }
        }
    }
    max
}

/// Great-circle distance in meters between two (latitude, longitude) points
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().clamp(0.0, 1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_parameters() -> ExplorationParameters {
        ExplorationParameters {
            consumer_count_min: 31,
            diameter_max: 5_000.0,
            distance_from_grid_min: 60_000.0,
            match_distance_max: 5_000.0,
        }
    }

    /// A tight clump of `count` buildings around (lat, lon)
    fn clump(base_id: i64, lat: f64, lon: f64, count: usize) -> Vec<BuildingSite> {
        (0..count)
            .map(|i| BuildingSite {
                building_id: base_id + i as i64,
                province: "Cabo Delgado".to_string(),
                building_type: "household".to_string(),
                surface: Some(40.0),
                // ~11 m spacing, well inside the default 300 m eps
                latitude: lat + (i as f64) * 0.0001,
                longitude: lon,
                distance_to_grid_m: 65_000.0,
                distance_to_road_m: 400.0,
                is_island: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_two_separate_clumps_become_two_candidates() {
        let mut sites = clump(0, -12.90, 40.50, 40);
        sites.extend(clump(1000, -13.50, 40.90, 40));
        let source = DbscanClusterSource::new(sites, vec![]);

        let outcome = source.discover(&test_parameters()).await.unwrap();
        assert_eq!(outcome.clusters_found, 2);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.candidates[0].cluster_id, 1);
        assert_eq!(outcome.candidates[1].cluster_id, 2);
        assert_eq!(outcome.candidates[0].num_buildings, 40);
        assert_eq!(outcome.candidates[0].buildings.len(), 40);
    }

    #[tokio::test]
    async fn test_road_and_grid_distance_filters() {
        let mut far_from_road = clump(0, -12.90, 40.50, 40);
        for site in &mut far_from_road {
            site.distance_to_road_m = 2_500.0;
        }
        let mut near_grid = clump(1000, -13.50, 40.90, 40);
        for site in &mut near_grid {
            site.distance_to_grid_m = 10_000.0;
        }
        let source = DbscanClusterSource::new(
            far_from_road.into_iter().chain(near_grid).collect(),
            vec![],
        );

        let outcome = source.discover(&test_parameters()).await.unwrap();
        assert_eq!(outcome.clusters_found, 0);
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_island_buildings_skip_the_road_filter() {
        let mut sites = clump(0, -12.90, 40.50, 40);
        for site in &mut sites {
            site.distance_to_road_m = 50_000.0;
            site.is_island = true;
        }
        let source = DbscanClusterSource::new(sites, vec![]);

        let outcome = source.discover(&test_parameters()).await.unwrap();
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_minigrid_match_is_filtered_but_counted() {
        let mut sites = clump(0, -12.90, 40.50, 40);
        sites.extend(clump(1000, -13.50, 40.90, 40));
        let source = DbscanClusterSource::new(
            sites,
            vec![ExistingMinigrid {
                name: "Quirimba".to_string(),
                latitude: -12.90,
                longitude: 40.50,
            }],
        );

        let outcome = source.discover(&test_parameters()).await.unwrap();
        // Raw count keeps the matched cluster, candidates drop it
        assert_eq!(outcome.clusters_found, 2);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].cluster_id, 1);
    }

    #[tokio::test]
    async fn test_wide_cluster_discarded_by_diameter() {
        // 100 points at ~11 m spacing chain into one cluster spanning ~1.1 km,
        // which exceeds the 500 m limit below
        let sites: Vec<BuildingSite> = (0..100)
            .map(|i| BuildingSite {
                building_id: i,
                province: "Niassa".to_string(),
                building_type: "household".to_string(),
                surface: None,
                latitude: -13.0 + (i as f64) * 0.0001,
                longitude: 36.0,
                distance_to_grid_m: 70_000.0,
                distance_to_road_m: 100.0,
                is_island: false,
            })
            .collect();
        let mut parameters = test_parameters();
        parameters.diameter_max = 500.0;

        let source = DbscanClusterSource::new(sites, vec![]);
        let outcome = source.discover(&parameters).await.unwrap();
        assert_eq!(outcome.clusters_found, 0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.2 km
        let d = haversine_m((0.0, 0.0), (1.0, 0.0));
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }
}
