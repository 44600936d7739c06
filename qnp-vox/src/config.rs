//! 行式 `key=value` 配置, 以及基于它的路径解析.
//!
//! 配置值一律以原始字符串保存, 类型转换在读取时按固定规则进行 (见 [`coerce`]).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::consts::defaults;
use crate::stage::Stage;
use crate::Subject;

/// 配置加载与取值错误.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 配置文件无法读取.
    #[error("failed to load configuration from {path}: {source}")]
    Io {
        /// 配置文件路径.
        path: PathBuf,
        /// 底层 I/O 错误.
        source: std::io::Error,
    },

    /// 配置值不符合期望类型.
    #[error("invalid value `{value}` for `{key}`: expected {expected}")]
    InvalidValue {
        /// 键.
        key: String,
        /// 原始值.
        value: String,
        /// 期望类型描述.
        expected: &'static str,
    },
}

/// 原始字符串按规则转换后的结果. 规则按以下顺序匹配, 先匹配者优先:
///
/// 1. `true` / `false` (大小写不敏感) -> [`Coerced::Bool`];
/// 2. 仅由数字和至多一个小数点组成 -> [`Coerced::Float`] (含小数点) 或 [`Coerced::Int`];
/// 3. 含逗号 -> [`Coerced::List`], 各项去除首尾空白;
/// 4. 其余 -> [`Coerced::Str`].
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced<'a> {
    /// 布尔值.
    Bool(bool),
    /// 整数.
    Int(i64),
    /// 浮点数.
    Float(f64),
    /// 字符串序列.
    List(Vec<&'a str>),
    /// 普通字符串.
    Str(&'a str),
}

/// 对原始配置值执行类型转换. 该函数不会失败.
pub fn coerce(raw: &str) -> Coerced<'_> {
    if raw.eq_ignore_ascii_case("true") {
        return Coerced::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Coerced::Bool(false);
    }

    let dots = raw.bytes().filter(|b| *b == b'.').count();
    let numeric = raw.bytes().any(|b| b.is_ascii_digit())
        && raw.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && dots <= 1;
    if numeric {
        if dots == 0 {
            if let Ok(i) = raw.parse::<i64>() {
                return Coerced::Int(i);
            }
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Coerced::Float(f);
        }
    }

    if raw.contains(',') {
        return Coerced::List(raw.split(',').map(str::trim).collect());
    }
    Coerced::Str(raw)
}

/// 扁平的键值存储. 键可以带点号 (`pipeline.name`), 以此表达嵌套.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    entries: BTreeMap<String, String>,
    warnings: Vec<String>,
}

impl ConfigStore {
    /// 从文本解析. 空行与 `#` 开头的行被忽略; 不含 `=` 的行记为警告而非错误.
    pub fn parse(text: &str) -> Self {
        let mut store = Self::default();
        for (no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((k, v)) => {
                    store.entries.insert(k.trim().to_owned(), v.trim().to_owned());
                }
                None => store
                    .warnings
                    .push(format!("Invalid config line {}: {line}", no + 1)),
            }
        }
        store
    }

    /// 读取并解析配置文件.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// 加载过程中产生的警告.
    #[inline]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// 设置 (或覆盖) 一个原始值.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// 是否存在 `key`.
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// 按点号路径查找原始值. 任一段缺失都返回 `None`.
    pub fn lookup(&self, key_path: &str) -> Option<&str> {
        if key_path.split('.').any(str::is_empty) {
            return None;
        }
        self.entries.get(key_path).map(String::as_str)
    }

    /// 取出以 `prefix.` 开头的所有条目, 去掉前缀后组成新的存储.
    pub fn section(&self, prefix: &str) -> Self {
        let head = format!("{prefix}.");
        let entries = self
            .entries
            .iter()
            .filter_map(|(k, v)| Some((k.strip_prefix(&head)?.to_owned(), v.clone())))
            .collect();
        Self {
            entries,
            warnings: Vec::new(),
        }
    }

    /// 按转换规则取值. 缺失时返回 `None`.
    #[inline]
    pub fn get(&self, key_path: &str) -> Option<Coerced<'_>> {
        self.lookup(key_path).map(coerce)
    }

    /// 以字符串形式取原始值, 不论其转换类型.
    #[inline]
    pub fn get_str<'a>(&'a self, key_path: &str, default: &'a str) -> &'a str {
        self.lookup(key_path).unwrap_or(default)
    }

    /// 取布尔值. 缺失或类型不符时返回 `default`.
    pub fn get_bool(&self, key_path: &str, default: bool) -> bool {
        match self.get(key_path) {
            Some(Coerced::Bool(b)) => b,
            _ => default,
        }
    }

    /// 取整数. 缺失或类型不符 (包括负数, 它们被视为字符串) 时返回 `default`.
    pub fn get_int(&self, key_path: &str, default: i64) -> i64 {
        match self.get(key_path) {
            Some(Coerced::Int(i)) => i,
            _ => default,
        }
    }

    /// 取浮点数, 整数会被提升. 缺失或类型不符时返回 `default`.
    pub fn get_float(&self, key_path: &str, default: f64) -> f64 {
        match self.get(key_path) {
            Some(Coerced::Float(f)) => f,
            Some(Coerced::Int(i)) => i as f64,
            _ => default,
        }
    }

    /// 取字符串序列. 非序列的非空值视为单元素序列; 缺失时返回空序列.
    pub fn get_string_list(&self, key_path: &str) -> Vec<String> {
        match self.get(key_path) {
            Some(Coerced::List(items)) => items.into_iter().map(str::to_owned).collect(),
            Some(_) => self
                .lookup(key_path)
                .filter(|raw| !raw.is_empty())
                .map(|raw| vec![raw.to_owned()])
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// 取整数序列. 任一项无法解析为整数时返回 `Err`.
    pub fn get_int_list<T: std::str::FromStr>(&self, key_path: &str) -> Result<Vec<T>, ConfigError> {
        self.get_string_list(key_path)
            .into_iter()
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<T>().map_err(|_| ConfigError::InvalidValue {
                    key: key_path.to_owned(),
                    value: item.clone(),
                    expected: "comma-separated integers",
                })
            })
            .collect()
    }
}

/// 流水线配置. 在 [`ConfigStore`] 之上提供所有路径约定.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    path: PathBuf,
    store: ConfigStore,
}

impl PipelineConfig {
    /// 打开配置文件. 文件不可读属于致命错误, 整个运行应当终止.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_owned();
        let store = ConfigStore::open(&path)?;
        Ok(Self { path, store })
    }

    /// 直接由已有存储创建. `path` 仅用于展示.
    pub fn from_store(path: impl Into<PathBuf>, store: ConfigStore) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    /// 配置文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 底层存储.
    #[inline]
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// 需要处理的被试. 给定 `requested` 时直接使用它, 否则读取 `subject_list`.
    pub fn subjects(&self, requested: Option<&[Subject]>) -> Result<Vec<Subject>, ConfigError> {
        match requested {
            Some(s) => Ok(s.to_vec()),
            None => self.store.get_int_list("subject_list"),
        }
    }

    /// `output_base`.
    #[inline]
    pub fn output_base(&self) -> PathBuf {
        PathBuf::from(self.store.get_str("output_base", defaults::OUTPUT_BASE))
    }

    /// `output_base/{s}`.
    pub fn subject_output_dir(&self, s: Subject) -> PathBuf {
        let mut p = self.output_base();
        p.push(s.to_string());
        p
    }

    /// `output_base/{s}/{s}{suffix}`.
    pub fn subject_stage_dir(&self, s: Subject, stage: Stage) -> PathBuf {
        let mut p = self.subject_output_dir(s);
        p.push(format!("{s}{}", stage.suffix()));
        p
    }

    /// 原始 MGZ: `input_mgz_images/{s}{subject_suffix}/{mgz_filename}`.
    pub fn input_mgz_path(&self, s: Subject) -> PathBuf {
        let dir = self
            .store
            .get_str("input_mgz_images", defaults::INPUT_MGZ_IMAGES);
        let suffix = self.store.get_str("subject_suffix", defaults::SUBJECT_SUFFIX);
        let name = self.store.get_str("mgz_filename", defaults::MGZ_FILENAME);
        [dir, &format!("{s}{suffix}"), name].iter().collect()
    }

    /// 被试的标注后缀. `special_annotation_{s}` 优先于 `annotation_suffix`.
    pub fn annotation_suffix(&self, s: Subject) -> &str {
        self.store
            .lookup(&format!("special_annotation_{s}"))
            .unwrap_or_else(|| {
                self.store
                    .get_str("annotation_suffix", defaults::ANNOTATION_SUFFIX)
            })
    }

    /// 标注文件: `input_halo_annotations/{s}{annotation_suffix}`.
    pub fn input_annotation_path(&self, s: Subject) -> PathBuf {
        let mut p = PathBuf::from(
            self.store
                .get_str("input_halo_annotations", defaults::INPUT_HALO_ANNOTATIONS),
        );
        p.push(format!("{s}{}", self.annotation_suffix(s)));
        p
    }

    /// Halo Summary Analysis 表.
    #[inline]
    pub fn summary_csv_path(&self) -> PathBuf {
        PathBuf::from(
            self.store
                .get_str("summary_analysis_csv", defaults::SUMMARY_ANALYSIS_CSV),
        )
    }

    /// 人工锚点文件.
    #[inline]
    pub fn manual_coordinates_file(&self) -> PathBuf {
        PathBuf::from(
            self.store
                .get_str("manual_coordinates_file", defaults::MANUAL_COORDINATES_FILE),
        )
    }

    /// 立方块边长.
    #[inline]
    pub fn block_size(&self) -> i64 {
        self.store.get_int("block_size", defaults::BLOCK_SIZE)
    }

    /// 高斯核标准差.
    #[inline]
    pub fn kernel_sigma(&self) -> f64 {
        self.store.get_float("kernel_sigma", defaults::KERNEL_SIGMA)
    }

    /// 平滑阈值.
    #[inline]
    pub fn kernel_threshold(&self) -> f64 {
        self.store
            .get_float("kernel_threshold", defaults::KERNEL_THRESHOLD)
    }

    /// R 切片脚本.
    #[inline]
    pub fn slicer_script(&self) -> &str {
        self.store.get_str("slicer_script", defaults::SLICER_SCRIPT)
    }

    /// 外部工具的工作目录. 切片脚本的临时输入输出都位于此处.
    #[inline]
    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(self.store.get_str("work_dir", "."))
    }

    /// MNI 模板. 未配置时返回第一个存在的候选位置; 都不存在则返回第一个候选.
    pub fn mni_template_path(&self) -> PathBuf {
        if let Some(p) = self.store.lookup("mni_template_path") {
            return PathBuf::from(p);
        }
        let candidates = defaults::MNI_TEMPLATE_CANDIDATES;
        candidates
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from(candidates[0]))
    }

    /// 日志文件: `logs_dir/pipeline.log`.
    pub fn log_file(&self) -> PathBuf {
        let mut p = PathBuf::from(self.store.get_str("logs_dir", defaults::LOGS_DIR));
        p.push(defaults::LOG_FILE);
        p
    }

    /// 流水线版本, 仅用于展示.
    #[inline]
    pub fn pipeline_version(&self) -> &str {
        self.store.get_str("pipeline_version", "Unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_rules_in_order() {
        assert_eq!(coerce("true"), Coerced::Bool(true));
        assert_eq!(coerce("False"), Coerced::Bool(false));
        assert_eq!(coerce("7"), Coerced::Int(7));
        assert_eq!(coerce("0.5"), Coerced::Float(0.5));
        assert_eq!(coerce("6966, 7038 ,7100"), Coerced::List(vec!["6966", "7038", "7100"]));
        assert_eq!(coerce("1.2.3"), Coerced::Str("1.2.3"));
        assert_eq!(coerce("-5"), Coerced::Str("-5"));
        assert_eq!(coerce("."), Coerced::Str("."));
        assert_eq!(coerce(""), Coerced::Str(""));
        assert_eq!(coerce("output"), Coerced::Str("output"));
    }

    #[test]
    fn test_parse_skips_comments_and_warns() {
        let store = ConfigStore::parse(
            "# header\n\noutput_base = out\nthis line is junk\nblock_size=5\npipeline.name=qnp\n",
        );
        assert_eq!(store.get_str("output_base", "x"), "out");
        assert_eq!(store.get_int("block_size", 7), 5);
        assert_eq!(store.warnings().len(), 1);
        assert!(store.warnings()[0].contains("line 4"));
        assert_eq!(store.section("pipeline").get_str("name", ""), "qnp");
    }

    #[test]
    fn test_typed_getters_fall_back_on_mismatch() {
        let store = ConfigStore::parse("a=abc\nb=2.5\nc=3\nflag=TRUE\n");
        assert_eq!(store.get_int("a", 9), 9);
        assert_eq!(store.get_int("b", 9), 9);
        assert_eq!(store.get_float("c", 0.0), 3.0);
        assert!(store.get_bool("flag", false));
        assert_eq!(store.get_int("missing.key", 4), 4);
        assert_eq!(store.lookup("c."), None);
    }

    #[test]
    fn test_subject_list_single_and_many() {
        let one = PipelineConfig::from_store("t", ConfigStore::parse("subject_list=6966"));
        assert_eq!(one.subjects(None).unwrap(), vec![6966]);

        let many = PipelineConfig::from_store("t", ConfigStore::parse("subject_list=1, 2,3"));
        assert_eq!(many.subjects(None).unwrap(), vec![1, 2, 3]);
        assert_eq!(many.subjects(Some(&[9])).unwrap(), vec![9]);

        let bad = PipelineConfig::from_store("t", ConfigStore::parse("subject_list=1,x"));
        assert!(bad.subjects(None).is_err());
    }

    #[test]
    fn test_paths() {
        let cfg = PipelineConfig::from_store(
            "t",
            ConfigStore::parse(
                "output_base=out\ninput_halo_annotations=ann\nspecial_annotation_7=-B2.annotations\n",
            ),
        );
        assert_eq!(
            cfg.subject_stage_dir(7, Stage::Extract),
            PathBuf::from("out/7/7_coordinates")
        );
        assert_eq!(
            cfg.input_annotation_path(7),
            PathBuf::from("ann/7-B2.annotations")
        );
        assert_eq!(
            cfg.input_annotation_path(8),
            PathBuf::from("ann/8-A1-AT8.annotations")
        );
        assert_eq!(
            cfg.input_mgz_path(8),
            PathBuf::from("Input/exvivo_transformed/8X/001.mgz")
        );
        assert_eq!(cfg.log_file(), PathBuf::from("logs/pipeline.log"));

        let moved = PipelineConfig::from_store("t", ConfigStore::parse("logs_dir=run/logs"));
        assert_eq!(moved.log_file(), PathBuf::from("run/logs/pipeline.log"));
    }
}
