use crate::domain::geo::GeoPoint;
use crate::domain::ports::Geocoder;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_GEOCODER_URL: &str = "https://geocode-maps.yandex.ru/1.x";

const SERVICE: &str = "geocoder";

/// Yandex geocoder client. Candidates come back most relevant first.
pub struct YandexGeocoder {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    response: GeocodeBody,
}

#[derive(Deserialize)]
struct GeocodeBody {
    #[serde(rename = "GeoObjectCollection")]
    collection: GeoObjectCollection,
}

#[derive(Deserialize)]
struct GeoObjectCollection {
    #[serde(rename = "featureMember", default)]
    members: Vec<FeatureMember>,
}

#[derive(Deserialize)]
struct FeatureMember {
    #[serde(rename = "GeoObject")]
    object: GeoObject,
}

#[derive(Deserialize)]
struct GeoObject {
    #[serde(rename = "Point")]
    point: Point,
}

#[derive(Deserialize)]
struct Point {
    /// "longitude latitude", space separated.
    pos: String,
}

fn parse_pos(pos: &str) -> Option<GeoPoint> {
    let mut parts = pos.split_whitespace();
    let lon = parts.next()?.parse().ok()?;
    let lat = parts.next()?.parse().ok()?;
    Some(GeoPoint::new(lat, lon))
}

impl YandexGeocoder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(BotError::Config("geocoder api key is empty".to_string()));
        }

        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Geocoder for YandexGeocoder {
    async fn lookup(&self, query: &str) -> Result<Vec<GeoPoint>> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("geocode", query),
                ("apikey", self.api_key.as_str()),
                ("sco", "longlat"),
                ("format", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::external(SERVICE, format!("{status}: {body}")));
        }

        let parsed: GeocodeResponse = response.json().await?;
        let points: Vec<GeoPoint> = parsed
            .response
            .collection
            .members
            .iter()
            .filter_map(|member| parse_pos(&member.object.point.pos))
            .collect();
        debug!(query, candidates = points.len(), "geocoded address");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pos_is_longitude_first() {
        assert_eq!(parse_pos("37.6208 55.7539"), Some(GeoPoint::new(55.7539, 37.6208)));
        assert_eq!(parse_pos("37.6"), None);
        assert_eq!(parse_pos("east north"), None);
    }

    #[test]
    fn test_response_parsing_keeps_order() {
        let raw = json!({
            "response": {"GeoObjectCollection": {"featureMember": [
                {"GeoObject": {"name": "first", "Point": {"pos": "37.0 55.0"}}},
                {"GeoObject": {"name": "second", "Point": {"pos": "30.0 59.0"}}}
            ]}}
        });
        let parsed: GeocodeResponse = serde_json::from_value(raw).unwrap();
        let first = parse_pos(&parsed.response.collection.members[0].object.point.pos);
        assert_eq!(first, Some(GeoPoint::new(55.0, 37.0)));
        assert_eq!(parsed.response.collection.members.len(), 2);
    }

    #[test]
    fn test_empty_result() {
        let raw = json!({"response": {"GeoObjectCollection": {"featureMember": []}}});
        let parsed: GeocodeResponse = serde_json::from_value(raw).unwrap();
        assert!(parsed.response.collection.members.is_empty());
    }
}
