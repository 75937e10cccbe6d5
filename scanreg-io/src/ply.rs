//! PLY format support

use crate::{PointCloudReader, PointCloudWriter};
use ply_rs::{
    parser::Parser,
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use scanreg_core::{Error, Point3d, PointCloud, Result, Vector3d};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

pub struct PlyReader;
pub struct PlyWriter;

/// One per-point field written by [`write_ply`]
///
/// A scalar column takes one property name, a vector column three.
#[derive(Debug, Clone, PartialEq)]
pub enum PlyColumn {
    Scalar(Vec<f64>),
    Vector(Vec<Vector3d>),
}

impl PlyColumn {
    pub fn points(points: &[Point3d]) -> Self {
        PlyColumn::Vector(points.iter().map(|p| p.coords).collect())
    }

    pub fn len(&self) -> usize {
        match self {
            PlyColumn::Scalar(values) => values.len(),
            PlyColumn::Vector(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of property names this column consumes
    pub fn width(&self) -> usize {
        match self {
            PlyColumn::Scalar(_) => 1,
            PlyColumn::Vector(_) => 3,
        }
    }

    fn push_values(&self, row: usize, out: &mut Vec<f64>) {
        match self {
            PlyColumn::Scalar(values) => out.push(values[row]),
            PlyColumn::Vector(values) => out.extend_from_slice(values[row].as_slice()),
        }
    }
}

impl PointCloudReader for PlyReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let parser = Parser::<DefaultElement>::new();
        let ply = parser.read_ply(&mut reader).map_err(parse_error)?;

        let vertices = ply
            .payload
            .get("vertex")
            .ok_or_else(|| Error::MalformedPointCloud("no vertex element".to_string()))?;

        let mut points = Vec::with_capacity(vertices.len());
        let mut normals = Vec::with_capacity(vertices.len());
        for vertex in vertices {
            let x = extract_property_value(vertex, "x")?;
            let y = extract_property_value(vertex, "y")?;
            let z = extract_property_value(vertex, "z")?;
            let nx = extract_property_value(vertex, "nx")?;
            let ny = extract_property_value(vertex, "ny")?;
            let nz = extract_property_value(vertex, "nz")?;
            points.push(Point3d::new(x, y, z));
            normals.push(Vector3d::new(nx, ny, nz));
        }

        log::debug!("read {} vertices with normals", points.len());
        PointCloud::with_normalized_normals(points, normals)
    }
}

/// ply-rs reports header and body syntax errors as I/O errors
fn parse_error(error: io::Error) -> Error {
    match error.kind() {
        ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
            Error::MalformedPointCloud(error.to_string())
        }
        _ => Error::Io(error),
    }
}

impl PointCloudWriter for PlyWriter {
    fn write_point_cloud<P: AsRef<Path>>(cloud: &PointCloud, path: P) -> Result<()> {
        write_ply(
            path,
            &[
                PlyColumn::points(cloud.points()),
                PlyColumn::Vector(cloud.normals().to_vec()),
            ],
            &["x", "y", "z", "nx", "ny", "nz"],
        )
    }
}

/// Write equal-length columns as a binary little-endian PLY file
///
/// Names are assigned positionally: a vector column takes the next three
/// names, a scalar column the next one. Every property is stored as
/// `double`, so values read back unchanged.
pub fn write_ply<P: AsRef<Path>>(path: P, columns: &[PlyColumn], names: &[&str]) -> Result<()> {
    let count = check_columns(columns, names)?;

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;

    let mut vertex_element = ElementDef::new("vertex".to_string());
    vertex_element.count = count;
    for name in names {
        vertex_element.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::Double),
        ));
    }
    ply.header.elements.add(vertex_element);

    let mut vertices = Vec::with_capacity(count);
    let mut values = Vec::with_capacity(names.len());
    for row in 0..count {
        values.clear();
        for column in columns {
            column.push_values(row, &mut values);
        }
        let mut vertex = DefaultElement::new();
        for (name, value) in names.iter().zip(values.iter()) {
            vertex.insert(name.to_string(), Property::Double(*value));
        }
        vertices.push(vertex);
    }
    ply.payload.insert("vertex".to_string(), vertices);

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let writer_instance = Writer::new();
    writer_instance.write_ply(&mut writer, &mut ply)?;
    writer.flush()?;

    log::debug!("wrote {} vertices with properties {:?}", count, names);
    Ok(())
}

/// Common length of the columns once the names fit them
fn check_columns(columns: &[PlyColumn], names: &[&str]) -> Result<usize> {
    let first = columns
        .first()
        .ok_or_else(|| Error::invalid("at least one column is required"))?;
    let count = first.len();
    if let Some(column) = columns.iter().find(|c| c.len() != count) {
        return Err(Error::invalid(format!(
            "columns differ in length: {} vs {}",
            count,
            column.len()
        )));
    }

    let width: usize = columns.iter().map(PlyColumn::width).sum();
    if width != names.len() {
        return Err(Error::invalid(format!(
            "{} property names given for {} values per point",
            names.len(),
            width
        )));
    }

    let mut seen = HashSet::new();
    if let Some(name) = names.iter().find(|name| !seen.insert(**name)) {
        return Err(Error::invalid(format!("duplicate property name '{}'", name)));
    }
    Ok(count)
}

/// Extract a property value as f64 from a PLY element
fn extract_property_value(element: &DefaultElement, name: &str) -> Result<f64> {
    match element.get(name) {
        Some(Property::Float(val)) => Ok(*val as f64),
        Some(Property::Double(val)) => Ok(*val),
        Some(Property::Int(val)) => Ok(*val as f64),
        Some(Property::UInt(val)) => Ok(*val as f64),
        Some(Property::Short(val)) => Ok(*val as f64),
        Some(Property::UShort(val)) => Ok(*val as f64),
        _ => Err(Error::MalformedPointCloud(format!(
            "property '{}' not found or invalid type",
            name
        ))),
    }
}
