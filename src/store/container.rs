//! Containers of an instance or router pod

/// Log line the sidecar emits once its request handler is up
pub const SIDECAR_READY_MARKER: &str = "Starting Operator request handler...";

/// The containers the operator places into server and router pods.
///
/// Server pods run `fixdatadir`, `initconf` and `initmysql` as init
/// containers followed by `sidecar` and `mysql`; router pods run `router`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerId {
    FixDataDir,
    InitConf,
    InitMysql,
    Sidecar,
    Mysql,
    Router,
}

impl ContainerId {
    /// Init containers of a server pod, in execution order
    pub const SERVER_INIT: [ContainerId; 3] = [
        ContainerId::FixDataDir,
        ContainerId::InitConf,
        ContainerId::InitMysql,
    ];

    pub const SERVER: [ContainerId; 2] = [ContainerId::Sidecar, ContainerId::Mysql];

    pub const fn as_str(self) -> &'static str {
        match self {
            ContainerId::FixDataDir => "fixdatadir",
            ContainerId::InitConf => "initconf",
            ContainerId::InitMysql => "initmysql",
            ContainerId::Sidecar => "sidecar",
            ContainerId::Mysql => "mysql",
            ContainerId::Router => "router",
        }
    }

    pub const fn is_init(self) -> bool {
        matches!(
            self,
            ContainerId::FixDataDir | ContainerId::InitConf | ContainerId::InitMysql
        )
    }

    pub fn parse(name: &str) -> Option<Self> {
        [
            ContainerId::FixDataDir,
            ContainerId::InitConf,
            ContainerId::InitMysql,
            ContainerId::Sidecar,
            ContainerId::Mysql,
            ContainerId::Router,
        ]
        .into_iter()
        .find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
