use std::collections::HashSet;

use geo::BoundingRect;

use crate::dataset::{AttrValue, FeatureCollection};
use crate::error::GeodataError;
use crate::lookups::{LookupRegistry, LsadPosition, SourceEntry};

/// All three enrichment passes in the order the batch runner applies them.
/// Each pass is a pure per-feature transform; re-running enrichment yields
/// identical derived values.
pub fn enrich(
    collection: &mut FeatureCollection,
    entry: &SourceEntry,
    summary_level: &str,
    registry: &LookupRegistry,
) -> Result<(), GeodataError> {
    add_herop_id(collection, summary_level, &entry.herop_id_suffixes)?;
    add_bbox(collection)?;
    add_label(collection, &entry.name_field, registry)
}

/// Derive `HEROP_ID = {summary level}US{suffix attribute values}` for every
/// feature. A feature missing one of the suffix attributes is an error, not
/// a silently malformed identifier.
pub fn add_herop_id(
    collection: &mut FeatureCollection,
    summary_level: &str,
    suffix_fields: &[String],
) -> Result<(), GeodataError> {
    let mut missing = Vec::new();

    for (index, feature) in collection.features.iter_mut().enumerate() {
        let mut joined = String::new();
        let mut complete = true;
        for field in suffix_fields {
            match feature.attr(field) {
                Some(value) if !value.is_null() => joined.push_str(&value.to_string()),
                _ => {
                    missing.push(format!("feature {index}: {field}"));
                    complete = false;
                }
            }
        }
        if complete {
            feature.set_attr(
                "HEROP_ID",
                AttrValue::Text(format!("{summary_level}US{joined}")),
            );
        }
    }

    if !missing.is_empty() {
        return Err(missing_attribute_error(&missing));
    }

    warn_on_duplicate_ids(collection);
    Ok(())
}

/// Derive `BBOX = minx,miny,maxx,maxy`, each coordinate rounded to three
/// decimal places.
pub fn add_bbox(collection: &mut FeatureCollection) -> Result<(), GeodataError> {
    let mut missing = Vec::new();

    for (index, feature) in collection.features.iter_mut().enumerate() {
        match feature.geometry.bounding_rect() {
            Some(rect) => {
                let bbox = format!(
                    "{:.3},{:.3},{:.3},{:.3}",
                    rect.min().x,
                    rect.min().y,
                    rect.max().x,
                    rect.max().y
                );
                feature.set_attr("BBOX", AttrValue::Text(bbox));
            }
            None => missing.push(format!("feature {index}: empty geometry")),
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing_attribute_error(&missing))
    }
}

/// Derive a display label from the name field, qualified by the LSAD
/// meaning when one resolves. The raw LSAD attribute may hold the code
/// ("25") or the qualifier text itself ("town"); both resolve. Features
/// without an LSAD attribute keep the bare name.
pub fn add_label(
    collection: &mut FeatureCollection,
    name_field: &str,
    registry: &LookupRegistry,
) -> Result<(), GeodataError> {
    let mut missing = Vec::new();

    for (index, feature) in collection.features.iter_mut().enumerate() {
        let name = match feature.attr(name_field) {
            Some(value) if !value.is_null() => value.to_string(),
            _ => {
                missing.push(format!("feature {index}: {name_field}"));
                continue;
            }
        };

        let lsad = feature
            .attr("LSAD")
            .and_then(AttrValue::as_text)
            .map(str::to_string)
            .filter(|value| !value.is_empty());

        let label = match lsad {
            Some(lsad) => {
                let resolved = registry
                    .lsad(&lsad)
                    .map(|entry| (entry.value.clone(), entry.position))
                    .or_else(|| {
                        registry
                            .lsad_by_value(&lsad)
                            .map(|entry| (lsad.clone(), entry.position))
                    });
                match resolved {
                    Some((qualifier, LsadPosition::Prefix)) => format!("{qualifier} {name}"),
                    Some((qualifier, LsadPosition::Suffix)) => format!("{name} {qualifier}"),
                    None => name,
                }
            }
            None => name,
        };
        feature.set_attr("LABEL", AttrValue::Text(label));
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing_attribute_error(&missing))
    }
}

fn missing_attribute_error(missing: &[String]) -> GeodataError {
    const SHOWN: usize = 5;
    let mut message = missing[..missing.len().min(SHOWN)].join("; ");
    if missing.len() > SHOWN {
        message.push_str(&format!(" (and {} more)", missing.len() - SHOWN));
    }
    GeodataError::MissingAttribute(message)
}

// Identifier uniqueness across merged fragments is not enforced; overlapping
// source files can legitimately repeat a unit. Surfaced as a warning only.
fn warn_on_duplicate_ids(collection: &FeatureCollection) {
    let mut seen = HashSet::new();
    for feature in &collection.features {
        if let Some(AttrValue::Text(id)) = feature.attr("HEROP_ID") {
            if !seen.insert(id.clone()) {
                tracing::warn!(herop_id = %id, "duplicate HEROP_ID in merged dataset");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use geo_types::{Geometry, MultiPolygon, polygon};
    use indexmap::IndexMap;

    use crate::dataset::{Crs, Feature};
    use crate::lookups::LsadEntry;

    use super::*;

    fn feature(attrs: &[(&str, &str)]) -> Feature {
        let square = polygon![
            (x: -88.2625, y: 40.0655),
            (x: -88.0, y: 40.0655),
            (x: -88.0, y: 40.3),
            (x: -88.2625, y: 40.3),
            (x: -88.2625, y: 40.0655),
        ];
        let mut attributes = IndexMap::new();
        for (name, value) in attrs {
            attributes.insert(name.to_string(), AttrValue::Text(value.to_string()));
        }
        Feature {
            attributes,
            geometry: Geometry::MultiPolygon(MultiPolygon(vec![square])),
        }
    }

    fn collection(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection {
            features,
            crs: Crs::NAD83,
            schema: Vec::new(),
        }
    }

    fn registry_with_lsad(entries: &[(&str, &str, LsadPosition)]) -> LookupRegistry {
        let mut lsad = BTreeMap::new();
        for (code, value, position) in entries {
            lsad.insert(
                code.to_string(),
                LsadEntry {
                    value: value.to_string(),
                    position: *position,
                },
            );
        }
        LookupRegistry::from_parts(BTreeMap::new(), BTreeMap::new(), lsad)
    }

    #[test]
    fn herop_id_concatenates_in_registry_order() {
        let mut collection = collection(vec![feature(&[
            ("STATEFP", "17"),
            ("COUNTYFP", "019"),
        ])]);
        let suffixes = vec!["STATEFP".to_string(), "COUNTYFP".to_string()];
        add_herop_id(&mut collection, "050", &suffixes).unwrap();
        assert_eq!(
            collection.features[0].attr("HEROP_ID"),
            Some(&AttrValue::Text("050US17019".to_string()))
        );
    }

    #[test]
    fn herop_id_is_idempotent() {
        let mut collection = collection(vec![feature(&[("GEOID", "17019")])]);
        let suffixes = vec!["GEOID".to_string()];
        add_herop_id(&mut collection, "140", &suffixes).unwrap();
        let first = collection.features[0].attr("HEROP_ID").cloned();
        add_herop_id(&mut collection, "140", &suffixes).unwrap();
        assert_eq!(collection.features[0].attr("HEROP_ID"), first.as_ref());
    }

    #[test]
    fn herop_id_missing_attribute_is_reported() {
        let mut collection = collection(vec![feature(&[("STATEFP", "17")])]);
        let suffixes = vec!["STATEFP".to_string(), "COUNTYFP".to_string()];
        let err = add_herop_id(&mut collection, "050", &suffixes).unwrap_err();
        assert_matches!(err, GeodataError::MissingAttribute(message) if message.contains("COUNTYFP"));
    }

    #[test]
    fn bbox_rounds_to_three_decimals() {
        let mut collection = collection(vec![feature(&[("NAME", "Champaign")])]);
        add_bbox(&mut collection).unwrap();
        let bbox = collection.features[0]
            .attr("BBOX")
            .and_then(AttrValue::as_text)
            .unwrap();
        assert_eq!(bbox, "-88.263,40.066,-88.000,40.300");

        let coords: Vec<f64> = bbox.split(',').map(|v| v.parse().unwrap()).collect();
        assert!(coords[0] <= coords[2]);
        assert!(coords[1] <= coords[3]);
    }

    #[test]
    fn label_with_suffix_qualifier() {
        let registry = registry_with_lsad(&[("25", "town", LsadPosition::Suffix)]);
        let mut collection =
            collection(vec![feature(&[("NAME", "Oakville"), ("LSAD", "25")])]);
        add_label(&mut collection, "NAME", &registry).unwrap();
        assert_eq!(
            collection.features[0].attr("LABEL"),
            Some(&AttrValue::Text("Oakville town".to_string()))
        );
    }

    #[test]
    fn label_with_prefix_qualifier() {
        let registry = registry_with_lsad(&[("04", "City of", LsadPosition::Prefix)]);
        let mut collection =
            collection(vec![feature(&[("NAME", "Milford"), ("LSAD", "04")])]);
        add_label(&mut collection, "NAME", &registry).unwrap();
        assert_eq!(
            collection.features[0].attr("LABEL"),
            Some(&AttrValue::Text("City of Milford".to_string()))
        );
    }

    #[test]
    fn label_reverse_lookup_on_qualifier_text() {
        let registry = registry_with_lsad(&[("25", "town", LsadPosition::Suffix)]);
        let mut collection =
            collection(vec![feature(&[("NAME", "Oakville"), ("LSAD", "town")])]);
        add_label(&mut collection, "NAME", &registry).unwrap();
        assert_eq!(
            collection.features[0].attr("LABEL"),
            Some(&AttrValue::Text("Oakville town".to_string()))
        );
    }

    #[test]
    fn label_without_lsad_keeps_plain_name() {
        let registry = registry_with_lsad(&[]);
        let mut collection = collection(vec![feature(&[("NAME", "Illinois")])]);
        add_label(&mut collection, "NAME", &registry).unwrap();
        assert_eq!(
            collection.features[0].attr("LABEL"),
            Some(&AttrValue::Text("Illinois".to_string()))
        );
    }

    #[test]
    fn label_missing_name_field_is_reported() {
        let registry = registry_with_lsad(&[]);
        let mut collection = collection(vec![feature(&[("LSAD", "25")])]);
        let err = add_label(&mut collection, "NAME", &registry).unwrap_err();
        assert_matches!(err, GeodataError::MissingAttribute(_));
    }
}
