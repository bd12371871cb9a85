use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("statistic {statistic} requested for {metric} on {entity} but absent from every datapoint")]
    MissingStatistic {
        entity: String,
        metric: String,
        statistic: String,
    },
    #[error("invalid timestamp from upstream: {0}")]
    InvalidTimestamp(String),
    #[error("cloudwatch error: {0}")]
    CloudWatch(Box<aws_sdk_cloudwatch::Error>),
    #[error("rds error: {0}")]
    Rds(Box<aws_sdk_rds::Error>),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<aws_sdk_cloudwatch::Error> for Error {
    fn from(err: aws_sdk_cloudwatch::Error) -> Self {
        Error::CloudWatch(Box::new(err))
    }
}

impl From<aws_sdk_rds::Error> for Error {
    fn from(err: aws_sdk_rds::Error) -> Self {
        Error::Rds(Box::new(err))
    }
}

impl Error {
    /// Upstream transport or service failures, as opposed to bad input or
    /// incomplete data.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::CloudWatch(_) | Error::Rds(_))
    }
}
