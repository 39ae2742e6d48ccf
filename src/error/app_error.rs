use thiserror::Error;

/// 应用错误
#[derive(Error, Debug)]
pub enum AppError {
    /// 配置错误（缺文件 / JSON 解析失败 / CSV 缺必需列）
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 连接错误（交易或行情会话）
    #[error("连接错误: {0}")]
    ConnectError(String),

    /// 行情数据错误
    #[error("行情错误: {0}")]
    MarketError(String),

    /// 交易接口错误
    #[error("交易错误: {0}")]
    TradeError(String),

    /// CSV 解析错误
    #[error("CSV错误: {0}")]
    CsvError(String),

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}
