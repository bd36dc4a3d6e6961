//! Error types shared by the collaborators and the reconciliation loop

/// Failures raised while asking the database who is authorized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// The query could not be executed at all (connection, credentials, bad SQL)
    Unavailable(String),
    /// Any other error raised while the query was running
    Query(String),
}

impl std::fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorityError::Unavailable(msg) => write!(f, "Authority database unavailable: {}", msg),
            AuthorityError::Query(msg) => write!(f, "Authority query failed: {}", msg),
        }
    }
}

impl std::error::Error for AuthorityError {}

/// Failures raised by the remote access group API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// No remote group matched the configured name (case-insensitive)
    GroupNotFound(String),
    /// Listing groups failed (transport error, non-success status, bad body)
    Unavailable(String),
    /// Overwriting a group's membership was rejected or never arrived
    Write(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::GroupNotFound(name) => write!(f, "Access group not found: {}", name),
            DirectoryError::Unavailable(msg) => write!(f, "Access group listing failed: {}", msg),
            DirectoryError::Write(msg) => write!(f, "Access group update failed: {}", msg),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Any failure that can interrupt reconciliation of a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    Authority(AuthorityError),
    Directory(DirectoryError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Authority(e) => write!(f, "{}", e),
            SyncError::Directory(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Authority(e) => Some(e),
            SyncError::Directory(e) => Some(e),
        }
    }
}

impl From<AuthorityError> for SyncError {
    fn from(e: AuthorityError) -> Self {
        SyncError::Authority(e)
    }
}

impl From<DirectoryError> for SyncError {
    fn from(e: DirectoryError) -> Self {
        SyncError::Directory(e)
    }
}

/// What the loop does after a group fails to reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Stop the scheduler and surface the error to the process
    Halt,
    /// Give up on the remaining groups of this tick
    AbortTick,
    /// Move on to the next group
    SkipGroup,
}

impl SyncError {
    /// Decide how the loop reacts to this error.
    ///
    /// With `halt_on_error` every failure stops the process. Otherwise outages of
    /// a whole dependency end the tick early and failures tied to one group only
    /// skip that group.
    pub fn action(&self, halt_on_error: bool) -> FailureAction {
        if halt_on_error {
            return FailureAction::Halt;
        }

        match self {
            SyncError::Authority(AuthorityError::Unavailable(_))
            | SyncError::Directory(DirectoryError::Unavailable(_)) => FailureAction::AbortTick,
            SyncError::Authority(AuthorityError::Query(_))
            | SyncError::Directory(DirectoryError::GroupNotFound(_))
            | SyncError::Directory(DirectoryError::Write(_)) => FailureAction::SkipGroup,
        }
    }
}
