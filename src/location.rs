//! Geographic context for queries
//!
//! Resolved once when the session host starts and attached to every query.
//! Any failure degrades to the configured default location.

use crate::client::wire::{Coordinates, Location};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const PROVINCE: &str = "山东省";

/// Coordinates farther than this from every known city are outside the service region
const MAX_CITY_DISTANCE_KM: f64 = 120.0;
const EARTH_RADIUS_KM: f64 = 6371.0;

struct City {
    name: &'static str,
    latitude: f64,
    longitude: f64,
    districts: &'static [&'static str],
}

const CITIES: &[City] = &[
    City {
        name: "济南市",
        latitude: 36.651,
        longitude: 117.120,
        districts: &[
            "历下区", "市中区", "槐荫区", "天桥区", "历城区", "长清区", "章丘区", "济阳区",
            "莱芜区", "钢城区", "平阴县", "商河县",
        ],
    },
    City {
        name: "青岛市",
        latitude: 36.067,
        longitude: 120.383,
        districts: &[
            "市南区", "市北区", "黄岛区", "崂山区", "李沧区", "城阳区", "即墨区", "胶州市",
            "平度市", "莱西市",
        ],
    },
    City {
        name: "烟台市",
        latitude: 37.464,
        longitude: 121.448,
        districts: &[
            "芝罘区", "福山区", "牟平区", "莱山区", "龙口市", "莱阳市", "莱州市", "蓬莱市",
            "招远市", "栖霞市", "海阳市", "长岛县",
        ],
    },
    City {
        name: "淄博市",
        latitude: 36.813,
        longitude: 118.055,
        districts: &[
            "淄川区", "张店区", "博山区", "临淄区", "周村区", "桓台县", "高青县", "沂源县",
        ],
    },
    City {
        name: "潍坊市",
        latitude: 36.707,
        longitude: 119.162,
        districts: &[
            "潍城区", "寒亭区", "坊子区", "奎文区", "青州市", "诸城市", "寿光市", "安丘市",
            "高密市", "昌邑市", "临朐县", "昌乐县",
        ],
    },
    City {
        name: "威海市",
        latitude: 37.513,
        longitude: 122.121,
        districts: &["环翠区", "文登区", "荣成市", "乳山市"],
    },
    City {
        name: "临沂市",
        latitude: 35.104,
        longitude: 118.356,
        districts: &[
            "兰山区", "罗庄区", "河东区", "沂南县", "郯城县", "沂水县", "兰陵县", "费县", "平邑县",
            "莒南县", "蒙阴县", "临沭县",
        ],
    },
    City {
        name: "德州市",
        latitude: 37.435,
        longitude: 116.359,
        districts: &[
            "德城区", "陵城区", "乐陵市", "禹城市", "临邑县", "平原县", "夏津县", "武城县",
            "庆云县", "宁津县", "齐河县",
        ],
    },
    City {
        name: "聊城市",
        latitude: 36.457,
        longitude: 115.985,
        districts: &["东昌府区", "茌平区", "临清市", "阳谷县", "莘县", "东阿县", "冠县", "高唐县"],
    },
    City {
        name: "泰安市",
        latitude: 36.200,
        longitude: 117.088,
        districts: &["泰山区", "岱岳区", "新泰市", "肥城市", "宁阳县", "东平县"],
    },
    City {
        name: "济宁市",
        latitude: 35.415,
        longitude: 116.587,
        districts: &[
            "任城区", "兖州区", "曲阜市", "邹城市", "微山县", "鱼台县", "金乡县", "嘉祥县",
            "汶上县", "泗水县", "梁山县",
        ],
    },
    City {
        name: "菏泽市",
        latitude: 35.233,
        longitude: 115.481,
        districts: &[
            "牡丹区", "定陶区", "曹县", "单县", "成武县", "巨野县", "郓城县", "鄄城县", "东明县",
        ],
    },
    City {
        name: "日照市",
        latitude: 35.417,
        longitude: 119.527,
        districts: &["东港区", "岚山区", "五莲县", "莒县"],
    },
    City {
        name: "滨州市",
        latitude: 37.383,
        longitude: 117.971,
        districts: &["滨城区", "沾化区", "惠民县", "阳信县", "无棣县", "博兴县", "邹平市"],
    },
    City {
        name: "枣庄市",
        latitude: 34.810,
        longitude: 117.323,
        districts: &["市中区", "薛城区", "峄城区", "台儿庄区", "山亭区", "滕州市"],
    },
    City {
        name: "东营市",
        latitude: 37.434,
        longitude: 118.675,
        districts: &["东营区", "河口区", "垦利区", "利津县", "广饶县"],
    },
];

/// Parse free text such as `山东省济南市历下区` into a location.
///
/// Unrecognised text yields an empty location.
pub fn parse_location(text: &str) -> Location {
    let mut location = Location::default();
    if text.contains("山东") {
        location.province = Some(PROVINCE.to_string());
    }

    for city in CITIES {
        let short = city.name.trim_end_matches('市');
        if text.contains(city.name) || text.contains(short) {
            location.province = Some(PROVINCE.to_string());
            location.city = Some(city.name.to_string());
            location.district = city
                .districts
                .iter()
                .find(|d| text.contains(*d))
                .map(|d| (*d).to_string());
            break;
        }
    }
    location
}

/// Nearest known city within the service region
pub fn nearest_city(coordinates: Coordinates) -> Option<Location> {
    CITIES
        .iter()
        .map(|city| (city, distance_km(coordinates, city.latitude, city.longitude)))
        .filter(|(_, km)| *km <= MAX_CITY_DISTANCE_KM)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(city, _)| Location::new(PROVINCE, city.name, None))
}

fn distance_km(from: Coordinates, latitude: f64, longitude: f64) -> f64 {
    let (lat1, lat2) = (from.latitude.to_radians(), latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (longitude - from.longitude).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("location capability unavailable: {0}")]
    Unavailable(String),
    #[error("location permission denied")]
    Denied,
}

/// External one-shot positioning capability
#[async_trait]
pub trait LocationCapability: Send + Sync {
    async fn locate(&self) -> Result<Coordinates, LocationError>;
}

/// Capability backed by configured coordinates
pub struct FixedCoordinates(pub Coordinates);

#[async_trait]
impl LocationCapability for FixedCoordinates {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        Ok(self.0)
    }
}

pub struct LocationProvider {
    capability: Option<Arc<dyn LocationCapability>>,
    default: Location,
    timeout: Duration,
}

impl LocationProvider {
    pub fn new(
        capability: Option<Arc<dyn LocationCapability>>,
        default: Location,
        timeout: Duration,
    ) -> Self {
        Self {
            capability,
            default,
            timeout,
        }
    }

    /// Resolve once; never fails
    pub async fn resolve(&self) -> Location {
        let Some(capability) = &self.capability else {
            tracing::info!(
                location = %self.default.label(),
                "No location capability, using default"
            );
            return self.default.clone();
        };

        match tokio::time::timeout(self.timeout, capability.locate()).await {
            Ok(Ok(coordinates)) => {
                if let Some(location) = nearest_city(coordinates) {
                    tracing::info!(location = %location.label(), "Resolved location");
                    location
                } else {
                    tracing::info!(
                        latitude = coordinates.latitude,
                        longitude = coordinates.longitude,
                        "Position outside service region, using default"
                    );
                    self.default.clone()
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Location lookup failed, using default");
                self.default.clone()
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Location lookup timed out, using default"
                );
                self.default.clone()
            }
        }
    }
}
