//! 通用常量.

/// 配置文件中未给出时使用的默认值.
pub mod defaults {
    /// 默认配置文件路径.
    pub const CONFIG_PATH: &str = "config/pipeline_config.txt";

    /// 日志目录. 其中的 `pipeline.log` 以追加方式记录每次运行.
    pub const LOGS_DIR: &str = "logs";

    /// 日志文件名.
    pub const LOG_FILE: &str = "pipeline.log";

    /// 所有被试输出的根目录.
    pub const OUTPUT_BASE: &str = "output";

    /// MGZ 原始图像目录.
    pub const INPUT_MGZ_IMAGES: &str = "Input/exvivo_transformed";

    /// MGZ 文件名.
    pub const MGZ_FILENAME: &str = "001.mgz";

    /// 被试 MGZ 目录名后缀.
    pub const SUBJECT_SUFFIX: &str = "X";

    /// Halo 标注目录.
    pub const INPUT_HALO_ANNOTATIONS: &str = "Input/Halo_extract/Annotations";

    /// 标注文件名后缀.
    pub const ANNOTATION_SUFFIX: &str = "-A1-AT8.annotations";

    /// Halo Summary Analysis 表.
    pub const SUMMARY_ANALYSIS_CSV: &str = "Input/Halo_extract/Summary Analysis(in).csv";

    /// 人工锚点文件.
    pub const MANUAL_COORDINATES_FILE: &str = "config/manual_coordinates.txt";

    /// R 切片脚本.
    pub const SLICER_SCRIPT: &str = "scripts/virtualmeatslicerNative.R";

    /// 立方块边长 (体素).
    pub const BLOCK_SIZE: i64 = 7;

    /// 高斯核标准差 (体素). 0.5mm 分辨率下对应 2mm 核.
    pub const KERNEL_SIGMA: f64 = 2.0;

    /// 平滑后保留体素的阈值 (严格大于).
    pub const KERNEL_THRESHOLD: f64 = 0.01;

    /// 未配置 `mni_template_path` 时依次尝试的 MNI 模板位置.
    pub const MNI_TEMPLATE_CANDIDATES: [&str; 2] = [
        "Input/mni_icbm152_t1_nlin_sym_09b_hires_stripped.nii.gz",
        "../V1/Cov_dev/mni_icbm152_t1_nlin_sym_09b_hires_stripped.nii.gz",
    ];
}

/// 标注与测量表的约定.
pub mod halo {
    /// 校准图层, 不是数据 tile.
    pub const CALIBRATION_LAYER: &str = "Layer 1";

    /// 测量表中 tile 区域标签的前缀.
    pub const TILE_PREFIX: &str = "Tile";

    /// 每个测量区域对应的顶点数. 第 `5 * i` 个顶点为第 `i` 个 tile 的代表角点.
    pub const VERTICES_PER_TILE: usize = 5;

    /// 标注坐标到粗网格的缩放因子 (向下取整).
    pub const COORD_SCALE: i64 = 1000;

    /// 测量表中图像标签列.
    pub const COL_IMAGE_TAG: &str = "Image Tag";

    /// 测量表中分析区域列.
    pub const COL_ANALYSIS_REGION: &str = "Analysis Region";

    /// 测量表中阳性组织百分比列.
    pub const COL_POSITIVE_TISSUE: &str = "% AT8 Positive Tissue";
}

/// 各阶段产物的固定文件名.
pub mod files {
    use crate::Subject;

    /// 人工上采样并重定向后的参考体数据.
    pub fn upsampled(s: Subject) -> String {
        format!("{s}_001_up_re.nii.gz")
    }

    /// 提取出的全部顶点坐标.
    pub fn tile_coord(s: Subject) -> String {
        format!("{s}_tile_coord.csv")
    }

    /// 提取出的测量值.
    pub fn at8(s: Subject) -> String {
        format!("{s}_AT8.csv")
    }

    /// 拼接后的 tile 记录.
    pub fn tile_proc(s: Subject) -> String {
        format!("{s}_tile_proc.csv")
    }

    /// 盖印得到的块体数据.
    pub fn mask_block(s: Subject) -> String {
        format!("{s}_QNP_AT8_mask_block.nii.gz")
    }

    /// 人工对齐后的块体数据.
    pub fn mask_block_aligned(s: Subject) -> String {
        format!("{s}_QNP_AT8_mask_block_aligned.nii.gz")
    }

    /// 变换后的绝对坐标.
    pub fn transformed_coordinates(s: Subject) -> String {
        format!("{s}_transformed_coordinates.csv")
    }

    /// 高斯平滑后的块体数据.
    pub fn smoothed(s: Subject) -> String {
        format!("{s}_QNP_AT8_smoothed_sig2.nii.gz")
    }

    /// `antsRegistrationSyN.sh -o` 的输出前缀. 工具把文件名直接接在前缀之后.
    pub fn registration_prefix(s: Subject) -> String {
        format!("{s}_")
    }

    /// ANTs 仿射变换.
    pub fn generic_affine(s: Subject) -> String {
        registration_prefix(s) + "0GenericAffine.mat"
    }

    /// ANTs 形变场.
    pub fn warp(s: Subject) -> String {
        registration_prefix(s) + "1Warp.nii.gz"
    }

    /// 变换到 MNI 空间的块体数据.
    pub fn to_mni(s: Subject) -> String {
        format!("{s}_QNP_mask_ToMNI.nii.gz")
    }
}
