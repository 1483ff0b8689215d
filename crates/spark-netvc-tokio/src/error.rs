//! 建连路径上的错误映射。
//!
//! 每个同步失败点对应一个 [`OperationKind`]，携带稳定错误码与默认文案；
//! `io::Error` 被保留为 [`NetError`] 的底层原因，类别固定为 `Transport`。

use std::io;

use spark_netvc::NetError;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.netvc.tokio.connect_failed",
    message: "connect",
};
pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.netvc.tokio.bind_failed",
    message: "bind",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.netvc.tokio.configure_failed",
    message: "configure socket",
};
pub(crate) const ADOPT: OperationKind = OperationKind {
    code: "spark.netvc.tokio.adopt_failed",
    message: "adopt socket",
};

/// 将 IO 错误映射为连接层的传输错误。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> NetError {
    NetError::transport(kind.code, format!("{}: {error}", kind.message), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_netvc::ErrorKind;

    #[test]
    fn io_errors_keep_code_and_source() {
        let err = map_io_error(
            CONNECT,
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(err.code(), "spark.netvc.tokio.connect_failed");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.message(), "connect: refused");
        assert!(std::error::Error::source(&err).is_some());
    }
}
