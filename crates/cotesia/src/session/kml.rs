//! KML rendering for finalized flights.
//!
//! Two artifacts are produced: a single red path line from the full
//! coordinate track, and a document of discrete placemarks, one per
//! release point. The output mirrors the files ground crews already
//! consume, so the structure is fixed.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::Result;

/// Icon used for discrete release points.
const POINT_ICON: &str = "http://maps.google.com/mapfiles/kml/shapes/placemark_circle.png";

/// Render the path-line KML for a flight.
#[must_use]
pub fn render_path(name: &str, coords: &[(f64, f64)]) -> String {
    let mut coord_text = String::new();
    for (lat, lon) in coords {
        // KML coordinate order is lon,lat
        let _ = write!(coord_text, "{lon:.6},{lat:.6},0 ");
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
      <name>{name}</name>
      <Style>
        <LineStyle>
          <color>ff0000ff</color>
          <width>3</width>
        </LineStyle>
      </Style>
      <LineString>
        <coordinates>{coords}</coordinates>
      </LineString>
    </Placemark>
  </Document>
</kml>
"#,
        name = name,
        coords = coord_text.trim_end(),
    )
}

/// Render the release-points KML for a flight.
#[must_use]
pub fn render_points(points: &[(f64, f64)]) -> String {
    let mut placemarks = String::new();
    for (lat, lon) in points {
        let _ = write!(
            placemarks,
            r#"    <Placemark>
      <Style>
        <IconStyle>
          <Icon><href>{POINT_ICON}</href></Icon>
        </IconStyle>
      </Style>
      <Point>
        <coordinates>{lon:.6},{lat:.6},0</coordinates>
      </Point>
    </Placemark>
"#
        );
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
{placemarks}  </Document>
</kml>
"#
    )
}

/// Write both KML artifacts for a flight: the path line from the full
/// track, the points document from the release points.
///
/// # Errors
///
/// Returns an error if either file cannot be written.
pub fn write_artifacts(
    path_file: &Path,
    points_file: &Path,
    flight_name: &str,
    track: &[(f64, f64)],
    release_points: &[(f64, f64)],
) -> Result<()> {
    std::fs::write(path_file, render_path(flight_name, track))?;
    std::fs::write(points_file, render_points(release_points))?;
    Ok(())
}
