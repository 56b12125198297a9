use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use geo_types::Geometry;
use indexmap::IndexMap;
use shapefile::Shape;
use shapefile::dbase::{self, FieldValue, TableWriterBuilder};

use crate::error::GeodataError;

/// One attribute value read from (or written to) a dbase table.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(value) => write!(f, "{value}"),
            AttrValue::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    write!(f, "{}", *value as i64)
                } else {
                    write!(f, "{value}")
                }
            }
            AttrValue::Bool(value) => write!(f, "{value}"),
            AttrValue::Null => Ok(()),
        }
    }
}

impl From<FieldValue> for AttrValue {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Character(Some(text)) => AttrValue::Text(text),
            FieldValue::Numeric(Some(number)) => AttrValue::Number(number),
            FieldValue::Float(Some(number)) => AttrValue::Number(f64::from(number)),
            FieldValue::Integer(number) => AttrValue::Number(f64::from(number)),
            FieldValue::Double(number) => AttrValue::Number(number),
            FieldValue::Currency(number) => AttrValue::Number(number),
            FieldValue::Logical(Some(flag)) => AttrValue::Bool(flag),
            FieldValue::Memo(text) => AttrValue::Text(text),
            _ => AttrValue::Null,
        }
    }
}

/// Coordinate reference of a whole collection, derived from the `.prj`
/// sidecar. Only geographic NAD83/WGS84 are meaningful here; anything else
/// is carried opaquely and rejected if a reprojection is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crs {
    Epsg(u32),
    Unknown(String),
}

impl Crs {
    pub const WGS84: Crs = Crs::Epsg(4326);
    pub const NAD83: Crs = Crs::Epsg(4269);

    fn from_prj_wkt(wkt: &str) -> Crs {
        if wkt.contains("North_American_1983") || wkt.contains("NAD83") {
            Crs::NAD83
        } else if wkt.contains("WGS_1984") || wkt.contains("WGS 84") {
            Crs::WGS84
        } else {
            Crs::Unknown(wkt.trim().to_string())
        }
    }

    fn to_prj_wkt(&self) -> Option<&str> {
        match self {
            Crs::Epsg(4326) => Some(
                "GEOGCS[\"GCS_WGS_1984\",DATUM[\"D_WGS_1984\",SPHEROID[\"WGS_1984\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"Degree\",0.017453292519943295]]",
            ),
            Crs::Epsg(4269) => Some(
                "GEOGCS[\"GCS_North_American_1983\",DATUM[\"D_North_American_1983\",SPHEROID[\"GRS_1980\",6378137,298.257222101]],PRIMEM[\"Greenwich\",0],UNIT[\"Degree\",0.017453292519943295]]",
            ),
            Crs::Unknown(wkt) => Some(wkt.as_str()).filter(|wkt| !wkt.is_empty()),
            Crs::Epsg(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub attributes: IndexMap<String, AttrValue>,
    pub geometry: Geometry<f64>,
}

impl Feature {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn set_attr(&mut self, name: &str, value: AttrValue) {
        self.attributes.insert(name.to_string(), value);
    }
}

/// The in-memory unit the pipeline manipulates: an ordered sequence of
/// features sharing one attribute schema and one coordinate reference.
#[derive(Debug, Clone)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
    pub crs: Crs,
    /// Field order from the source dbase header, used for merge validation.
    pub schema: Vec<String>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Relabel geographic NAD83 as WGS84 before GeoJSON export. The datum
    /// delta is sub-meter, far below the precision carried by these
    /// cartographic boundary files, so coordinates pass through unchanged.
    /// A projected source reference cannot be handled and is an error.
    pub fn reproject_to_wgs84(&mut self) -> Result<(), GeodataError> {
        match &self.crs {
            Crs::Epsg(4326) => Ok(()),
            Crs::Epsg(4269) => {
                self.crs = Crs::WGS84;
                Ok(())
            }
            other => Err(GeodataError::UnsupportedCrs(format!("{other:?}"))),
        }
    }

    pub fn write_geojson(&self, path: &Path) -> Result<(), GeodataError> {
        let mut features = Vec::with_capacity(self.features.len());
        for feature in &self.features {
            let geometry = geojson::Geometry::new(geojson::Value::from(&feature.geometry));
            let mut properties = geojson::JsonObject::new();
            for (name, value) in &feature.attributes {
                properties.insert(name.clone(), attr_to_json(value));
            }
            features.push(geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }
        let collection = geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        }
        let file =
            fs::File::create(path).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        serde_json::to_writer(file, &collection)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))
    }

    /// Write the collection, in its current coordinate reference, as a
    /// shapefile bundle. The dbase schema is derived from the first
    /// feature's attributes. Only polygon collections are supported; every
    /// boundary dataset this pipeline handles is polygonal.
    pub fn write_shapefile(&self, shp_path: &Path) -> Result<(), GeodataError> {
        let first = self
            .features
            .first()
            .ok_or_else(|| GeodataError::Filesystem("empty collection".to_string()))?;

        if let Some(parent) = shp_path.parent() {
            fs::create_dir_all(parent).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        }

        let mut builder = TableWriterBuilder::new();
        for (name, value) in &first.attributes {
            let field_name = dbase::FieldName::try_from(name.as_str())
                .map_err(|err| GeodataError::SchemaMismatch(format!("field {name}: {err:?}")))?;
            builder = match value {
                AttrValue::Number(_) => builder.add_numeric_field(field_name, 24, 6),
                AttrValue::Bool(_) => builder.add_logical_field(field_name),
                AttrValue::Text(_) | AttrValue::Null => {
                    builder.add_character_field(field_name, 254)
                }
            };
        }

        let mut writer = shapefile::Writer::from_path(shp_path, builder)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;

        for feature in &self.features {
            let Geometry::MultiPolygon(multi_polygon) = &feature.geometry else {
                return Err(GeodataError::UnsupportedGeometry(shp_path.to_path_buf()));
            };
            let shape = shapefile::Polygon::from(multi_polygon.clone());

            let mut record = dbase::Record::default();
            for (name, value) in &feature.attributes {
                record.insert(name.clone(), to_field_value(value));
            }
            writer
                .write_shape_and_record(&shape, &record)
                .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        }
        drop(writer);

        if let Some(wkt) = self.crs.to_prj_wkt() {
            fs::write(shp_path.with_extension("prj"), wkt)
                .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}

/// Read one geometry file as an independent feature collection, keeping its
/// native coordinate reference.
pub fn read_shapefile(path: &Path) -> Result<FeatureCollection, GeodataError> {
    let shapes = shapefile::read_shapes(path).map_err(|err| {
        GeodataError::Filesystem(format!("read {}: {err}", path.display()))
    })?;

    let dbf_path = path.with_extension("dbf");
    let mut reader = dbase::Reader::from_path(&dbf_path).map_err(|err| {
        GeodataError::Filesystem(format!("read {}: {err}", dbf_path.display()))
    })?;
    let schema: Vec<String> = reader
        .fields()
        .iter()
        .map(|field| field.name().to_string())
        .collect();
    let records = reader
        .read()
        .map_err(|err| GeodataError::Filesystem(format!("read {}: {err}", dbf_path.display())))?;

    if shapes.len() != records.len() {
        return Err(GeodataError::SchemaMismatch(format!(
            "{}: {} shapes but {} records",
            path.display(),
            shapes.len(),
            records.len()
        )));
    }

    let mut features = Vec::with_capacity(shapes.len());
    for (shape, record) in shapes.into_iter().zip(records) {
        let geometry = shape_to_geometry(shape, path)?;
        let mut values: HashMap<String, FieldValue> = record.into_iter().collect();
        let mut attributes = IndexMap::with_capacity(schema.len());
        for name in &schema {
            let value = values
                .remove(name)
                .map(AttrValue::from)
                .unwrap_or(AttrValue::Null);
            attributes.insert(name.clone(), value);
        }
        features.push(Feature {
            attributes,
            geometry,
        });
    }

    let crs = match fs::read_to_string(path.with_extension("prj")) {
        Ok(wkt) => Crs::from_prj_wkt(&wkt),
        Err(_) => Crs::Unknown(String::new()),
    };

    Ok(FeatureCollection {
        features,
        crs,
        schema,
    })
}

/// Concatenate one or more geometry files into a single collection,
/// preserving input order and adopting the first file's coordinate
/// reference. Every subsequent file must agree with the first on both the
/// attribute schema and the coordinate reference; a ragged merge would
/// otherwise surface much later as malformed derived fields or geometries
/// in the wrong coordinate space.
pub fn merge(paths: &[PathBuf]) -> Result<FeatureCollection, GeodataError> {
    let first_path = paths
        .first()
        .ok_or_else(|| GeodataError::Filesystem("no input files to merge".to_string()))?;
    let mut merged = read_shapefile(first_path)?;

    for path in &paths[1..] {
        let collection = read_shapefile(path)?;
        if collection.crs != merged.crs {
            return Err(GeodataError::SchemaMismatch(format!(
                "{} does not share the coordinate reference of {}",
                path.display(),
                first_path.display()
            )));
        }
        if collection.schema != merged.schema {
            return Err(GeodataError::SchemaMismatch(format!(
                "{} fields [{}] differ from {} fields [{}]",
                path.display(),
                collection.schema.join(", "),
                first_path.display(),
                merged.schema.join(", ")
            )));
        }
        merged.features.extend(collection.features);
    }

    Ok(merged)
}

fn shape_to_geometry(shape: Shape, path: &Path) -> Result<Geometry<f64>, GeodataError> {
    match shape {
        Shape::Point(point) => Ok(Geometry::Point(point.into())),
        Shape::Multipoint(points) => Ok(Geometry::MultiPoint(points.into())),
        Shape::Polyline(line) => Ok(Geometry::MultiLineString(line.into())),
        Shape::Polygon(polygon) => Ok(Geometry::MultiPolygon(polygon.into())),
        _ => Err(GeodataError::UnsupportedGeometry(path.to_path_buf())),
    }
}

fn attr_to_json(value: &AttrValue) -> serde_json::Value {
    match value {
        AttrValue::Text(text) => serde_json::Value::String(text.clone()),
        AttrValue::Number(number) => serde_json::Number::from_f64(*number)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        AttrValue::Bool(flag) => serde_json::Value::Bool(*flag),
        AttrValue::Null => serde_json::Value::Null,
    }
}

fn to_field_value(value: &AttrValue) -> FieldValue {
    match value {
        AttrValue::Text(text) => FieldValue::Character(Some(text.clone())),
        AttrValue::Number(number) => FieldValue::Numeric(Some(*number)),
        AttrValue::Bool(flag) => FieldValue::Logical(Some(*flag)),
        AttrValue::Null => FieldValue::Character(None),
    }
}
