// Operation codes written after the request id.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Notification,
    Create,
    Delete,
    Exists,
    GetData,
    SetData,
    GetAcl,
    SetAcl,
    GetChildren,
    Sync,
    Ping,
    GetChildren2,
    Check,
    Multi,
    CreateWithStat,
    RemoveWatches,
    CreateContainer,
    CreateTtl,
    Auth,
    SetWatches,
    GetEphemerals,
    SetWatches2,
    AddWatch,
    CloseSession,
    Error,
}

impl OpCode {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Notification,
            1 => Self::Create,
            2 => Self::Delete,
            3 => Self::Exists,
            4 => Self::GetData,
            5 => Self::SetData,
            6 => Self::GetAcl,
            7 => Self::SetAcl,
            8 => Self::GetChildren,
            9 => Self::Sync,
            11 => Self::Ping,
            12 => Self::GetChildren2,
            13 => Self::Check,
            14 => Self::Multi,
            15 => Self::CreateWithStat,
            18 => Self::RemoveWatches,
            19 => Self::CreateContainer,
            21 => Self::CreateTtl,
            100 => Self::Auth,
            101 => Self::SetWatches,
            103 => Self::GetEphemerals,
            105 => Self::SetWatches2,
            106 => Self::AddWatch,
            -11 => Self::CloseSession,
            -1 => Self::Error,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Notification => 0,
            Self::Create => 1,
            Self::Delete => 2,
            Self::Exists => 3,
            Self::GetData => 4,
            Self::SetData => 5,
            Self::GetAcl => 6,
            Self::SetAcl => 7,
            Self::GetChildren => 8,
            Self::Sync => 9,
            Self::Ping => 11,
            Self::GetChildren2 => 12,
            Self::Check => 13,
            Self::Multi => 14,
            Self::CreateWithStat => 15,
            Self::RemoveWatches => 18,
            Self::CreateContainer => 19,
            Self::CreateTtl => 21,
            Self::Auth => 100,
            Self::SetWatches => 101,
            Self::GetEphemerals => 103,
            Self::SetWatches2 => 105,
            Self::AddWatch => 106,
            Self::CloseSession => -11,
            Self::Error => -1,
        }
    }

    /// Lower-case label used for log fields and metric tags.
    pub fn name(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Exists => "exists",
            Self::GetData => "get_data",
            Self::SetData => "set_data",
            Self::GetAcl => "get_acl",
            Self::SetAcl => "set_acl",
            Self::GetChildren => "get_children",
            Self::Sync => "sync",
            Self::Ping => "ping",
            Self::GetChildren2 => "get_children2",
            Self::Check => "check",
            Self::Multi => "multi",
            Self::CreateWithStat => "create2",
            Self::RemoveWatches => "remove_watches",
            Self::CreateContainer => "create_container",
            Self::CreateTtl => "create_ttl",
            Self::Auth => "auth",
            Self::SetWatches => "set_watches",
            Self::GetEphemerals => "get_ephemerals",
            Self::SetWatches2 => "set_watches2",
            Self::AddWatch => "add_watch",
            Self::CloseSession => "close_session",
            Self::Error => "error",
        }
    }
}
