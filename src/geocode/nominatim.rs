use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{GeocodeError, Geocoder};
use crate::models::GeoPoint;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// Half-width in degrees of the viewbox used to express proximity
const VIEWBOX_SPAN: f64 = 0.25;

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct ReverseHit {
    display_name: Option<String>,
    error: Option<String>,
}

pub struct NominatimGeocoder {
    client: Client,
    base_url: Url,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    fn search_url(&self, query: &str, proximity: Option<GeoPoint>) -> Result<Url, GeocodeError> {
        let mut url = self.base_url.join("search")?;
        {
            let mut params = url.query_pairs_mut();
            params
                .append_pair("q", query)
                .append_pair("format", "jsonv2")
                .append_pair("limit", "1");
            if let Some(p) = proximity {
                params.append_pair("viewbox", &viewbox(p));
            }
        }
        Ok(url)
    }

    fn reverse_url(&self, lon: f64, lat: f64) -> Result<Url, GeocodeError> {
        let mut url = self.base_url.join("reverse")?;
        url.query_pairs_mut()
            .append_pair("lat", &lat.to_string())
            .append_pair("lon", &lon.to_string())
            .append_pair("format", "jsonv2");
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, GeocodeError> {
        debug!("Geocoder request {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status));
        }
        Ok(response.json().await?)
    }
}

/// `left,top,right,bottom` box around a point
fn viewbox(p: GeoPoint) -> String {
    format!(
        "{},{},{},{}",
        p.lon - VIEWBOX_SPAN,
        p.lat + VIEWBOX_SPAN,
        p.lon + VIEWBOX_SPAN,
        p.lat - VIEWBOX_SPAN
    )
}

fn parse_hit(hit: &SearchHit) -> Result<GeoPoint, GeocodeError> {
    let lat = hit.lat.parse::<f64>();
    let lon = hit.lon.parse::<f64>();
    match (lat, lon) {
        (Ok(lat), Ok(lon)) if GeoPoint::new(lat, lon).is_valid() => Ok(GeoPoint::new(lat, lon)),
        _ => Err(GeocodeError::Malformed(format!(
            "bad coordinates ({}, {})",
            hit.lat, hit.lon
        ))),
    }
}

impl Geocoder for NominatimGeocoder {
    async fn forward_geocode(
        &self,
        query: &str,
        proximity: Option<GeoPoint>,
    ) -> Result<Option<GeoPoint>, GeocodeError> {
        let hits: Vec<SearchHit> = self.get_json(self.search_url(query, proximity)?).await?;
        hits.first().map(parse_hit).transpose()
    }

    async fn reverse_geocode(&self, lon: f64, lat: f64) -> Result<Option<String>, GeocodeError> {
        let hit: ReverseHit = self.get_json(self.reverse_url(lon, lat)?).await?;
        if let Some(error) = hit.error {
            debug!("No address at ({}, {}): {}", lat, lon, error);
            return Ok(None);
        }
        Ok(hit.display_name.filter(|name| !name.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoder(base: &str) -> NominatimGeocoder {
        NominatimGeocoder::new(base, "citywiki-test", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_search_url_with_viewbox() {
        let g = geocoder("https://nominatim.example.org/api");
        let url = g
            .search_url("10 Rue de Rivoli, Paris", Some(GeoPoint::new(48.0, 2.0)))
            .unwrap();
        assert_eq!(url.path(), "/api/search");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("q".to_string(), "10 Rue de Rivoli, Paris".to_string())));
        assert!(pairs.contains(&("format".to_string(), "jsonv2".to_string())));
        assert!(pairs.contains(&("viewbox".to_string(), "1.75,48.25,2.25,47.75".to_string())));
    }

    #[test]
    fn test_reverse_url() {
        let url = geocoder(DEFAULT_NOMINATIM_URL).reverse_url(2.5, 48.5).unwrap();
        assert_eq!(url.path(), "/reverse");
        assert_eq!(url.query(), Some("lat=48.5&lon=2.5&format=jsonv2"));
    }

    #[test]
    fn test_parse_hit() {
        let hits: Vec<SearchHit> =
            serde_json::from_str(r#"[{"lat":"48.8584","lon":"2.2945","display_name":"Tour Eiffel"}]"#)
                .unwrap();
        assert_eq!(parse_hit(&hits[0]).unwrap(), GeoPoint::new(48.8584, 2.2945));

        let bad = SearchHit {
            lat: "north".to_string(),
            lon: "2.0".to_string(),
        };
        assert!(matches!(parse_hit(&bad), Err(GeocodeError::Malformed(_))));
    }
}
