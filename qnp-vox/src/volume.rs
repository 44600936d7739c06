//! nifti 体数据与立方块盖印.
//!
//! 与 nibabel 一致, 体数据按 nifti 的 `(x, y, z)` 顺序索引, 仿射信息 (qform/sform)
//! 完全继承自参考图像的 header.

use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{s, Array3, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use serde::{Deserialize, Serialize};

use crate::anchor::ManualAnchor;
use crate::annotation::TileRecord;
use crate::Idx3d;

/// 体数据读写错误.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    /// nifti 读写失败.
    #[error("nifti error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 数据不是三维的.
    #[error("expected a 3D volume, got shape {0:?}")]
    NotThreeDimensional(Vec<usize>),

    /// header 记录的网格与数据形状不一致.
    #[error("header grid {header:?} does not match data shape {data:?}")]
    ShapeMismatch {
        /// header 中的形状.
        header: Idx3d,
        /// 数据的形状.
        data: Idx3d,
    },
}

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 从 header 读出体素网格形状 `(x, y, z)`.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    let [_, x, y, z, ..] = h.dim;
    (x as usize, y as usize, z as usize)
}

/// 体数据 header 的共用属性和部分通用操作.
pub trait VolumeHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取体素网格形状.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (x, y, z) = self.shape();
        x * y * z
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (x0, y0, z0): &Idx3d) -> bool {
        let (x, y, z) = self.shape();
        *x0 < x && *y0 < y && *z0 < z
    }

    /// 将有符号坐标转换为合法索引. 任一轴越界 (包括负数) 都返回 `None`.
    #[inline]
    fn locate(&self, x: i64, y: i64, z: i64) -> Option<Idx3d> {
        let (nx, ny, nz) = self.shape();
        let axis = |v: i64, n: usize| usize::try_from(v).ok().filter(|v| *v < n);
        Some((axis(x, nx)?, axis(y, ny)?, axis(z, nz)?))
    }
}

/// 参考体数据. 只读取 header, 不加载体素.
#[derive(Debug, Clone)]
pub struct ReferenceGrid {
    header: BoxedHeader,
}

impl VolumeHeaderAttr for ReferenceGrid {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl ReferenceGrid {
    /// 读取 `.nii` 或 `.nii.gz` 文件的 header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let header = NiftiHeader::from_file(path.as_ref())?;
        Ok(Self::from_header(header))
    }

    /// 直接由 header 创建.
    #[inline]
    pub fn from_header(header: NiftiHeader) -> Self {
        Self {
            header: Box::new(header),
        }
    }
}

/// 体素值为 `f64` 的 3D 密度体数据.
#[derive(Debug, Clone)]
pub struct DensityVolume {
    header: BoxedHeader,
    data: Array3<f64>,
}

impl VolumeHeaderAttr for DensityVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for DensityVolume {
    type Output = f64;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for DensityVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl DensityVolume {
    /// 创建与 `grid` 形状一致的全零体数据, 仿射信息不变.
    pub fn zeros_like(grid: &ReferenceGrid) -> Self {
        Self {
            header: grid.header.clone(),
            data: Array3::zeros(grid.shape()),
        }
    }

    /// 由 header 和数据组合. 两者形状不一致时返回 `Err`.
    pub fn from_parts(header: NiftiHeader, data: Array3<f64>) -> Result<Self, VolumeError> {
        let expected = get_shape_from_header(&header);
        if expected != data.dim() {
            return Err(VolumeError::ShapeMismatch {
                header: expected,
                data: data.dim(),
            });
        }
        Ok(Self {
            header: Box::new(header),
            data,
        })
    }

    /// 打开 nii 文件格式的 3D 体数据. 若带有长度为 1 的多余维度, 则将其去除.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());
        let data = obj.into_volume().into_ndarray::<f64>()?;

        let shape = data.shape().to_vec();
        if shape.len() < 3 || shape[3..].iter().any(|d| *d != 1) {
            return Err(VolumeError::NotThreeDimensional(shape));
        }
        let mut data = data;
        while data.ndim() > 3 {
            data = data.index_axis_move(Axis(3), 0);
        }
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|_| VolumeError::NotThreeDimensional(shape))?;
        Ok(Self { header, data })
    }

    /// 写出为 nifti 文件. 路径以 `.gz` 结尾时自动压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&self.data)?;
        Ok(())
    }

    /// 消费自我, 获得 header 与底层数据.
    #[inline]
    pub fn into_parts(self) -> (NiftiHeader, Array3<f64>) {
        (*self.header, self.data)
    }

    /// 非零体素个数.
    #[inline]
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }

    /// 以 `(x, y, z)` 为中心盖印边长为 `side` 的立方块, 逐体素裁剪到体数据范围内.
    ///
    /// 每个轴上的偏移范围为 `[-(side / 2), side - side / 2 - 1]`: 奇数边长严格居中,
    /// 偶数边长向负方向多占一个体素. `side <= 0` 时不写入任何体素.
    /// 已有值被直接覆盖.
    pub fn stamp_cube(&mut self, (x, y, z): (i64, i64, i64), side: i64, value: f64) {
        if side <= 0 {
            return;
        }
        let lo = -(side / 2);
        let hi = side - side / 2; // 开区间
        let (nx, ny, nz) = self.shape();
        let clip = |c: i64, n: usize| {
            let n = n as i64;
            let a = c.saturating_add(lo).clamp(0, n);
            let b = c.saturating_add(hi).clamp(0, n);
            (a as usize, b as usize)
        };
        let (x0, x1) = clip(x, nx);
        let (y0, y1) = clip(y, ny);
        let (z0, z1) = clip(z, nz);
        if x0 < x1 && y0 < y1 && z0 < z1 {
            self.data.slice_mut(s![x0..x1, y0..y1, z0..z1]).fill(value);
        }
    }
}

/// 平移后的绝对体素坐标. 即使越界也会被记录.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedTile {
    /// 瓦片名.
    #[serde(rename = "Tile")]
    pub tile: String,
    /// 绝对 x.
    #[serde(rename = "X")]
    pub x: i64,
    /// 固定切片 y.
    #[serde(rename = "Y")]
    pub y: i64,
    /// 绝对 z.
    #[serde(rename = "Z")]
    pub z: i64,
    /// 测量值.
    #[serde(rename = "AT8")]
    pub value: f64,
}

/// `transformed_coordinates` 表头.
pub const TRANSFORMED_HEADER: [&str; 5] = ["Tile", "X", "Y", "Z", "AT8"];

impl TransformedTile {
    /// 体素中心.
    #[inline]
    pub fn center(&self) -> (i64, i64, i64) {
        (self.x, self.y, self.z)
    }
}

/// [`build`] 的产物.
#[derive(Debug, Clone)]
pub struct BlockBuild {
    /// 盖印后的体数据.
    pub volume: DensityVolume,
    /// 全部记录的绝对坐标, 与输入同序.
    pub transformed: Vec<TransformedTile>,
    /// 中心越界而被跳过的记录在 `transformed` 中的下标.
    pub out_of_bounds: Vec<usize>,
}

impl BlockBuild {
    /// 实际盖印的立方块个数.
    #[inline]
    pub fn placed(&self) -> usize {
        self.transformed.len() - self.out_of_bounds.len()
    }
}

/// 将瓦片记录按锚点平移, 并在与 `reference` 同形状的零体数据中逐个盖印立方块.
///
/// 绝对坐标为 `(X + anchor.x, anchor.y_slice, Z + anchor.z)`. 中心越界的记录不写入任何体素,
/// 只记入 [`BlockBuild::out_of_bounds`]. 重叠处后写者覆盖先写者.
pub fn build(
    reference: &ReferenceGrid,
    records: &[TileRecord],
    anchor: &ManualAnchor,
    block_size: i64,
) -> BlockBuild {
    let mut volume = DensityVolume::zeros_like(reference);
    let mut out_of_bounds = Vec::new();
    let transformed = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let x = r.x.checked_add(anchor.x);
            let z = r.z.checked_add(anchor.z);
            let t = TransformedTile {
                tile: r.tile.clone(),
                x: x.unwrap_or_else(|| r.x.saturating_add(anchor.x)),
                y: anchor.y_slice,
                z: z.unwrap_or_else(|| r.z.saturating_add(anchor.z)),
                value: r.value,
            };
            // 溢出的坐标一定落在体外.
            let inside = x
                .zip(z)
                .and_then(|(x, z)| volume.locate(x, t.y, z))
                .is_some();
            if inside {
                volume.stamp_cube(t.center(), block_size, t.value);
            } else {
                out_of_bounds.push(i);
            }
            t
        })
        .collect();
    BlockBuild {
        volume,
        transformed,
        out_of_bounds,
    }
}
