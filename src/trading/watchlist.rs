use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::AppError;
use crate::trading::model::{normalize_symbol, pass_code_filter, StockParams};

/// 必需的表头列（大小写不敏感，未知列忽略）
const REQUIRED_COLUMNS: [&str; 9] = [
    "SHORTNAME",
    "SYMBOL",
    "TRADINGDATE",
    "AVAIL_VOL",
    "TOTAL_VOL",
    "CLOSE",
    "FB_FLAG",
    "ZB_FLAG",
    "SECOND_FLAG",
];

fn split_line(line: &str) -> Vec<String> {
    line.split(',')
        .map(|t| t.trim_matches(|c: char| c.is_whitespace() || c == '"').to_string())
        .collect()
}

/// 加载当日 watchlist CSV
///
/// 表头按列名定位，缺必需列视为配置错误；无法识别市场前缀的行跳过。
pub fn load_watchlist(path: &Path) -> Result<Vec<StockParams>, AppError> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::CsvError(format!("{}: {}", path.display(), e)))?;

    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| AppError::CsvError(format!("{}: 空文件", path.display())))?;

    let columns: HashMap<String, usize> = split_line(header)
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_uppercase(), i))
        .collect();

    for required in REQUIRED_COLUMNS {
        if !columns.contains_key(required) {
            return Err(AppError::CsvError(format!(
                "{}: 缺少必需列 {}",
                path.display(),
                required
            )));
        }
    }

    let col = |name: &str| columns[&name.to_uppercase()];
    let mut stocks = Vec::new();

    for line in lines {
        let fields = split_line(line);
        let get = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("");

        let raw_symbol = get(col("SYMBOL"));
        let symbol = match normalize_symbol(raw_symbol) {
            Ok(s) => s,
            Err(e) => {
                warn!("watchlist 跳过一行: {}", e);
                continue;
            }
        };

        let parse_i64 = |idx: usize| get(idx).parse::<i64>().unwrap_or(0);
        let parse_i32 = |idx: usize| get(idx).parse::<i32>().unwrap_or(0);
        let parse_f64 = |idx: usize| get(idx).parse::<f64>().unwrap_or(0.0);

        stocks.push(StockParams {
            shortname: get(col("SHORTNAME")).to_string(),
            symbol,
            trading_date: get(col("TRADINGDATE")).to_string(),
            avail_vol: parse_i64(col("AVAIL_VOL")),
            total_vol: parse_i64(col("TOTAL_VOL")),
            pre_close: parse_f64(col("CLOSE")),
            fb_flag: parse_i32(col("FB_FLAG")),
            zb_flag: parse_i32(col("ZB_FLAG")),
            second_flag: parse_i32(col("SECOND_FLAG")),
        });
    }

    if stocks.is_empty() {
        return Err(AppError::CsvError(format!(
            "{}: 没有可用的股票行",
            path.display()
        )));
    }
    Ok(stocks)
}

fn csv_files_by_mtime(dir: &Path) -> Vec<(PathBuf, std::time::SystemTime)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !is_csv {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            if let Ok(mtime) = meta.modified() {
                files.push((path, mtime));
            }
        }
    }
    files
}

/// 目录里最近修改的 *.csv
pub fn find_latest_csv(dir: &Path) -> Option<PathBuf> {
    csv_files_by_mtime(dir)
        .into_iter()
        .max_by_key(|(_, mtime)| *mtime)
        .map(|(path, _)| path)
}

/// 底仓清单文件：优先最近的 *_list*.csv，退回最近的任意 csv
pub fn find_latest_list_csv(dir: &Path) -> Option<PathBuf> {
    let files = csv_files_by_mtime(dir);
    let list_pick = files
        .iter()
        .filter(|(p, _)| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains("_list"))
                .unwrap_or(false)
        })
        .max_by_key(|(_, mtime)| *mtime)
        .map(|(p, _)| p.clone());
    list_pick.or_else(|| {
        files
            .into_iter()
            .max_by_key(|(_, mtime)| *mtime)
            .map(|(p, _)| p)
    })
}

/// 行内任意一列出现六位代码即认；NNNNNN.XX 形式截断到代码
fn extract_code_token(raw: &str) -> Option<String> {
    let mut token = raw
        .trim_matches(|c: char| c.is_whitespace() || c == '"')
        .to_string();
    if token.len() >= 9 && token.as_bytes().get(6) == Some(&b'.') {
        token.truncate(6);
    }
    if token.len() == 6 && token.chars().all(|c| c.is_ascii_digit()) {
        Some(token)
    } else {
        None
    }
}

/// 从底仓清单目录读取买入标的（去重、排序、代码区间过滤）
pub fn load_buy_list(
    dir: &Path,
    code_min: Option<&str>,
    code_max: Option<&str>,
) -> (Vec<String>, Option<PathBuf>) {
    let Some(path) = find_latest_list_csv(dir) else {
        return (Vec::new(), None);
    };
    let Ok(content) = fs::read_to_string(&path) else {
        return (Vec::new(), Some(path));
    };

    let mut dedup = HashSet::new();
    let mut symbols = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let code = line.split(',').find_map(extract_code_token);
        let Some(code) = code else { continue };
        if !pass_code_filter(&code, code_min, code_max) {
            continue;
        }
        let Ok(symbol) = normalize_symbol(&code) else {
            continue;
        };
        if dedup.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }
    symbols.sort();
    (symbols, Some(path))
}
