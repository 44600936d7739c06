//! Halo 标注与测量表的解析, 以及两者的按位置拼接.
//!
//! 标注 XML 的大致结构:
//!
//! ```text
//! <Annotations>
//!   <Annotation Name="Layer 1"> ... </Annotation>      <- 校准图层, 整体跳过
//!   <Annotation Name="Tile 1">
//!     <Regions><Region><Vertices>
//!       <V X="..." Y="..."/> ...
//!     </Vertices></Region></Regions>
//!   </Annotation>
//! </Annotations>
//! ```

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::consts::halo;
use crate::Subject;

/// 解析标注或测量表的错误.
#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    /// 文件读取失败.
    #[error("failed to read {path}: {source}")]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        source: std::io::Error,
    },

    /// XML 语法错误.
    #[error("malformed annotation document: {0}")]
    Xml(#[from] quick_xml::Error),

    /// 顶点缺少坐标或坐标不是数字.
    #[error("malformed vertex #{index}: {reason}")]
    Vertex {
        /// 顶点在文档中的序号 (从 0 开始, 包括被跳过的图层).
        index: usize,
        /// 原因.
        reason: String,
    },

    /// CSV 读写错误.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// 测量表缺少必需列.
    #[error("measurement table has no `{0}` column")]
    MissingColumn(&'static str),

    /// 测量值不是数字.
    #[error("row {row}: `{value}` is not a percentage")]
    Value {
        /// 数据行号 (不含表头, 从 1 开始).
        row: usize,
        /// 原始值.
        value: String,
    },
}

/// 解析结果.
pub type AnnotationResult<T> = Result<T, AnnotationError>;

/// 多边形顶点坐标, 以标注原始单位给出.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    /// 所属标注图层 (tile) 名.
    #[serde(rename = "Name")]
    pub name: String,
    /// 水平坐标.
    #[serde(rename = "X")]
    pub x: i64,
    /// 垂直坐标.
    #[serde(rename = "Y")]
    pub y: i64,
}

/// 单个分析区域的阳性组织百分比.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// 区域标签, 以 `Tile` 开头.
    #[serde(rename = "Tile")]
    pub tile: String,
    /// 百分比.
    #[serde(rename = "AT8_Value")]
    pub value: f64,
}

/// 拼接后的 tile 记录. `x`, `z` 位于粗网格 (原始坐标整除 1000) 上.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    /// tile 名.
    #[serde(rename = "Tile")]
    pub tile: String,
    /// 来自顶点 X.
    #[serde(rename = "X")]
    pub x: i64,
    /// 来自顶点 Y.
    #[serde(rename = "Z")]
    pub z: i64,
    /// 测量值.
    #[serde(rename = "AT8")]
    pub value: f64,
}

/// `tile_coord.csv` 表头.
pub const COORDINATE_HEADER: [&str; 3] = ["Name", "X", "Y"];

/// `AT8.csv` 表头.
pub const MEASUREMENT_HEADER: [&str; 2] = ["Tile", "AT8_Value"];

/// `tile_proc.csv` 表头.
pub const TILE_RECORD_HEADER: [&str; 4] = ["Tile", "X", "Z", "AT8"];

fn attr_of(e: &BytesStart<'_>, name: &str) -> AnnotationResult<Option<String>> {
    Ok(match e.try_get_attribute(name)? {
        Some(a) => Some(a.unescape_value()?.into_owned()),
        None => None,
    })
}

/// 解析顶点坐标. 接受整数; 小数向零截断.
fn parse_coord(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// 按文档顺序提取所有非校准图层的顶点.
///
/// 同一文档重复解析得到完全相同的序列.
pub fn extract_coordinates(xml: &str) -> AnnotationResult<Vec<Coordinate>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    // 嵌套的 `Annotation` 以最内层为准.
    let mut groups: Vec<String> = Vec::new();
    let mut vertex_index = 0usize;
    let mut ans = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"Annotation" => {
                groups.push(attr_of(&e, "Name")?.unwrap_or_default());
            }
            Event::End(e) if e.name().as_ref() == b"Annotation" => {
                groups.pop();
            }
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"V" => {
                let index = vertex_index;
                vertex_index += 1;
                let Some(name) = groups.last() else {
                    continue;
                };
                if name == halo::CALIBRATION_LAYER {
                    continue;
                }
                let coord = |axis: &str| -> AnnotationResult<i64> {
                    let raw = attr_of(&e, axis)?.ok_or_else(|| AnnotationError::Vertex {
                        index,
                        reason: format!("missing `{axis}`"),
                    })?;
                    parse_coord(&raw).ok_or_else(|| AnnotationError::Vertex {
                        index,
                        reason: format!("`{axis}` = `{raw}` is not a number"),
                    })
                };
                let (x, y) = (coord("X")?, coord("Y")?);
                ans.push(Coordinate {
                    name: name.clone(),
                    x,
                    y,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ans)
}

/// 读取标注文件并提取顶点. 非 UTF-8 字节会被替换.
pub fn read_coordinates<P: AsRef<Path>>(path: P) -> AnnotationResult<Vec<Coordinate>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| AnnotationError::Io {
        path: path.to_owned(),
        source,
    })?;
    extract_coordinates(&String::from_utf8_lossy(&bytes))
}

/// Halo 导出的表格为 latin-1 编码, 每个字节直接对应一个码位.
#[inline]
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// 从 Summary Analysis 表提取 `subject` 的 tile 测量值, 保持原表行序.
///
/// 先选出图像标签包含 `"{subject}-"` 的行, 再选出区域标签以 `Tile` 开头的行.
pub fn extract_measurements<R: Read>(r: R, subject: Subject) -> AnnotationResult<Vec<Measurement>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(r);
    let headers: Vec<String> = reader.byte_headers()?.iter().map(latin1).collect();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or(AnnotationError::MissingColumn(name))
    };
    let tag_col = column(halo::COL_IMAGE_TAG)?;
    let region_col = column(halo::COL_ANALYSIS_REGION)?;
    let value_col = column(halo::COL_POSITIVE_TISSUE)?;

    let pattern = format!("{subject}-");
    let mut ans = Vec::new();
    for (row, record) in reader.byte_records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).map(latin1).unwrap_or_default();

        if !field(tag_col).contains(&pattern) {
            continue;
        }
        let region = field(region_col);
        if !region.starts_with(halo::TILE_PREFIX) {
            continue;
        }
        let raw = field(value_col);
        let value = match raw.trim() {
            "" => f64::NAN,
            v => v.parse::<f64>().map_err(|_| AnnotationError::Value {
                row: row + 1,
                value: raw.clone(),
            })?,
        };
        ans.push(Measurement {
            tile: region,
            value,
        });
    }
    Ok(ans)
}

/// 打开测量表并提取 `subject` 的测量值.
pub fn read_measurements<P: AsRef<Path>>(
    path: P,
    subject: Subject,
) -> AnnotationResult<Vec<Measurement>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| AnnotationError::Io {
        path: path.to_owned(),
        source,
    })?;
    extract_measurements(file, subject)
}

/// 按位置对应关系拼接顶点与测量值.
///
/// 第 `i` 个测量值对应第 `5 * i` 个顶点; 没有对应顶点的测量值被静默丢弃.
/// 坐标整除 1000 (向下取整) 后存入记录.
///
/// 若 `measurements` 为空, 则退化为每个顶点一条记录, 测量值为 0, 坐标不缩放.
pub fn join(coords: &[Coordinate], measurements: &[Measurement]) -> Vec<TileRecord> {
    if measurements.is_empty() {
        return coords
            .iter()
            .map(|c| TileRecord {
                tile: c.name.clone(),
                x: c.x,
                z: c.y,
                value: 0.0,
            })
            .collect();
    }

    measurements
        .iter()
        .enumerate()
        .filter_map(|(i, m)| {
            let c = coords.get(halo::VERTICES_PER_TILE * i)?;
            Some(TileRecord {
                tile: c.name.clone(),
                x: c.x.div_euclid(halo::COORD_SCALE),
                z: c.y.div_euclid(halo::COORD_SCALE),
                value: m.value,
            })
        })
        .collect()
}

/// 以给定表头写出 CSV. 即使 `rows` 为空也会写出表头.
pub fn write_csv<P, T, I>(path: P, header: &[&str], rows: I) -> Result<(), csv::Error>
where
    P: AsRef<Path>,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut w = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    w.write_record(header)?;
    for row in rows {
        w.serialize(row)?;
    }
    w.flush()?;
    Ok(())
}

/// 读取 `tile_proc.csv`.
pub fn read_tile_records<P: AsRef<Path>>(path: P) -> Result<Vec<TileRecord>, csv::Error> {
    csv::Reader::from_path(path)?.deserialize().collect()
}
