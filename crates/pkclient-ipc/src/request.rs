//! Role-specific transaction requests
//!
//! A [`TransactionRequest`] is the role of a transaction together with the
//! parameters that role takes. Each variant corresponds to exactly one
//! method of the transaction interface.
//!
//! Parameters are packaged as-is. The only adjustment is that an empty
//! filter or flag set is sent as the explicit `none` value; everything else
//! is validated by the service.

use std::fmt;

use pkclient_core::domain::{
    Bitfield, Filters, Group, Role, SigType, TransactionFlags, UpgradeKind, WireValue,
};

/// A role and its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRequest {
    AcceptEula {
        eula_id: String,
    },
    DependsOn {
        filters: Filters,
        package_ids: Vec<String>,
        recursive: bool,
    },
    DownloadPackages {
        store_in_cache: bool,
        package_ids: Vec<String>,
    },
    GetCategories,
    GetDetails {
        package_ids: Vec<String>,
    },
    /// Details of local package files
    GetDetailsLocal {
        files: Vec<String>,
    },
    GetDistroUpgrades,
    GetFiles {
        package_ids: Vec<String>,
    },
    GetFilesLocal {
        files: Vec<String>,
    },
    GetOldTransactions {
        number: u32,
    },
    GetPackages {
        filters: Filters,
    },
    GetRepoList {
        filters: Filters,
    },
    GetUpdateDetail {
        package_ids: Vec<String>,
    },
    GetUpdates {
        filters: Filters,
    },
    InstallFiles {
        flags: TransactionFlags,
        files: Vec<String>,
    },
    InstallPackages {
        flags: TransactionFlags,
        package_ids: Vec<String>,
    },
    InstallSignature {
        sig_type: SigType,
        key_id: String,
        package_id: String,
    },
    RefreshCache {
        force: bool,
    },
    RemovePackages {
        flags: TransactionFlags,
        package_ids: Vec<String>,
        allow_deps: bool,
        autoremove: bool,
    },
    RepairSystem {
        flags: TransactionFlags,
    },
    RepoEnable {
        repo_id: String,
        enabled: bool,
    },
    RepoRemove {
        flags: TransactionFlags,
        repo_id: String,
        autoremove: bool,
    },
    RepoSetData {
        repo_id: String,
        parameter: String,
        value: String,
    },
    RequiredBy {
        filters: Filters,
        package_ids: Vec<String>,
        recursive: bool,
    },
    /// Package names to package ids
    Resolve {
        filters: Filters,
        packages: Vec<String>,
    },
    SearchDetails {
        filters: Filters,
        values: Vec<String>,
    },
    SearchFiles {
        filters: Filters,
        values: Vec<String>,
    },
    /// `values` are group names in their wire form
    SearchGroups {
        filters: Filters,
        values: Vec<String>,
    },
    SearchNames {
        filters: Filters,
        values: Vec<String>,
    },
    UpdatePackages {
        flags: TransactionFlags,
        package_ids: Vec<String>,
    },
    UpgradeSystem {
        flags: TransactionFlags,
        distro_id: String,
        kind: UpgradeKind,
    },
    WhatProvides {
        filters: Filters,
        values: Vec<String>,
    },
}

fn filters(filters: Filters) -> WireValue {
    WireValue::U64(filters.or_none().bits())
}

fn flags(flags: TransactionFlags) -> WireValue {
    WireValue::U64(flags.or_none().bits())
}

fn list(items: &[String]) -> WireValue {
    WireValue::str_list(items.iter().cloned())
}

impl TransactionRequest {
    /// The role this request performs
    pub fn role(&self) -> Role {
        use TransactionRequest as R;

        match self {
            R::AcceptEula { .. } => Role::AcceptEula,
            R::DependsOn { .. } => Role::DependsOn,
            R::DownloadPackages { .. } => Role::DownloadPackages,
            R::GetCategories => Role::GetCategories,
            R::GetDetails { .. } => Role::GetDetails,
            R::GetDetailsLocal { .. } => Role::GetDetailsLocal,
            R::GetDistroUpgrades => Role::GetDistroUpgrades,
            R::GetFiles { .. } => Role::GetFiles,
            R::GetFilesLocal { .. } => Role::GetFilesLocal,
            R::GetOldTransactions { .. } => Role::GetOldTransactions,
            R::GetPackages { .. } => Role::GetPackages,
            R::GetRepoList { .. } => Role::GetRepoList,
            R::GetUpdateDetail { .. } => Role::GetUpdateDetail,
            R::GetUpdates { .. } => Role::GetUpdates,
            R::InstallFiles { .. } => Role::InstallFiles,
            R::InstallPackages { .. } => Role::InstallPackages,
            R::InstallSignature { .. } => Role::InstallSignature,
            R::RefreshCache { .. } => Role::RefreshCache,
            R::RemovePackages { .. } => Role::RemovePackages,
            R::RepairSystem { .. } => Role::RepairSystem,
            R::RepoEnable { .. } => Role::RepoEnable,
            R::RepoRemove { .. } => Role::RepoRemove,
            R::RepoSetData { .. } => Role::RepoSetData,
            R::RequiredBy { .. } => Role::RequiredBy,
            R::Resolve { .. } => Role::Resolve,
            R::SearchDetails { .. } => Role::SearchDetails,
            R::SearchFiles { .. } => Role::SearchFile,
            R::SearchGroups { .. } => Role::SearchGroup,
            R::SearchNames { .. } => Role::SearchName,
            R::UpdatePackages { .. } => Role::UpdatePackages,
            R::UpgradeSystem { .. } => Role::UpgradeSystem,
            R::WhatProvides { .. } => Role::WhatProvides,
        }
    }

    /// Name of the transaction method to call
    pub fn method(&self) -> &'static str {
        use TransactionRequest as R;

        match self {
            R::AcceptEula { .. } => "AcceptEula",
            R::DependsOn { .. } => "DependsOn",
            R::DownloadPackages { .. } => "DownloadPackages",
            R::GetCategories => "GetCategories",
            R::GetDetails { .. } => "GetDetails",
            R::GetDetailsLocal { .. } => "GetDetailsLocal",
            R::GetDistroUpgrades => "GetDistroUpgrades",
            R::GetFiles { .. } => "GetFiles",
            R::GetFilesLocal { .. } => "GetFilesLocal",
            R::GetOldTransactions { .. } => "GetOldTransactions",
            R::GetPackages { .. } => "GetPackages",
            R::GetRepoList { .. } => "GetRepoList",
            R::GetUpdateDetail { .. } => "GetUpdateDetail",
            R::GetUpdates { .. } => "GetUpdates",
            R::InstallFiles { .. } => "InstallFiles",
            R::InstallPackages { .. } => "InstallPackages",
            R::InstallSignature { .. } => "InstallSignature",
            R::RefreshCache { .. } => "RefreshCache",
            R::RemovePackages { .. } => "RemovePackages",
            R::RepairSystem { .. } => "RepairSystem",
            R::RepoEnable { .. } => "RepoEnable",
            R::RepoRemove { .. } => "RepoRemove",
            R::RepoSetData { .. } => "RepoSetData",
            R::RequiredBy { .. } => "RequiredBy",
            R::Resolve { .. } => "Resolve",
            R::SearchDetails { .. } => "SearchDetails",
            R::SearchFiles { .. } => "SearchFiles",
            R::SearchGroups { .. } => "SearchGroups",
            R::SearchNames { .. } => "SearchNames",
            R::UpdatePackages { .. } => "UpdatePackages",
            R::UpgradeSystem { .. } => "UpgradeSystem",
            R::WhatProvides { .. } => "WhatProvides",
        }
    }

    /// Positional arguments of the method call
    pub fn args(&self) -> Vec<WireValue> {
        use TransactionRequest as R;

        match self {
            R::AcceptEula { eula_id } => vec![WireValue::from(eula_id.as_str())],
            R::DependsOn {
                filters: f,
                package_ids,
                recursive,
            }
            | R::RequiredBy {
                filters: f,
                package_ids,
                recursive,
            } => vec![filters(*f), list(package_ids), WireValue::Bool(*recursive)],
            R::DownloadPackages {
                store_in_cache,
                package_ids,
            } => vec![WireValue::Bool(*store_in_cache), list(package_ids)],
            R::GetCategories | R::GetDistroUpgrades => Vec::new(),
            R::GetDetails { package_ids }
            | R::GetFiles { package_ids }
            | R::GetUpdateDetail { package_ids } => vec![list(package_ids)],
            R::GetDetailsLocal { files } | R::GetFilesLocal { files } => vec![list(files)],
            R::GetOldTransactions { number } => vec![WireValue::U32(*number)],
            R::GetPackages { filters: f }
            | R::GetRepoList { filters: f }
            | R::GetUpdates { filters: f } => vec![filters(*f)],
            R::InstallFiles { flags: fl, files } => vec![flags(*fl), list(files)],
            R::InstallPackages {
                flags: fl,
                package_ids,
            }
            | R::UpdatePackages {
                flags: fl,
                package_ids,
            } => vec![flags(*fl), list(package_ids)],
            R::InstallSignature {
                sig_type,
                key_id,
                package_id,
            } => vec![
                WireValue::U32(sig_type.as_u32()),
                WireValue::from(key_id.as_str()),
                WireValue::from(package_id.as_str()),
            ],
            R::RefreshCache { force } => vec![WireValue::Bool(*force)],
            R::RemovePackages {
                flags: fl,
                package_ids,
                allow_deps,
                autoremove,
            } => vec![
                flags(*fl),
                list(package_ids),
                WireValue::Bool(*allow_deps),
                WireValue::Bool(*autoremove),
            ],
            R::RepairSystem { flags: fl } => vec![flags(*fl)],
            R::RepoEnable { repo_id, enabled } => {
                vec![WireValue::from(repo_id.as_str()), WireValue::Bool(*enabled)]
            }
            R::RepoRemove {
                flags: fl,
                repo_id,
                autoremove,
            } => vec![
                flags(*fl),
                WireValue::from(repo_id.as_str()),
                WireValue::Bool(*autoremove),
            ],
            R::RepoSetData {
                repo_id,
                parameter,
                value,
            } => vec![
                WireValue::from(repo_id.as_str()),
                WireValue::from(parameter.as_str()),
                WireValue::from(value.as_str()),
            ],
            R::Resolve {
                filters: f,
                packages: values,
            }
            | R::SearchDetails { filters: f, values }
            | R::SearchFiles { filters: f, values }
            | R::SearchGroups { filters: f, values }
            | R::SearchNames { filters: f, values }
            | R::WhatProvides { filters: f, values } => vec![filters(*f), list(values)],
            R::UpgradeSystem {
                flags: fl,
                distro_id,
                kind,
            } => vec![
                flags(*fl),
                WireValue::from(distro_id.as_str()),
                WireValue::U32(kind.as_u32()),
            ],
        }
    }
}

impl fmt::Display for TransactionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role())
    }
}

// ============================================================================
// Role methods
// ============================================================================

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Group names for every member of a group bitfield
///
/// Positions 1 to 63 are tested individually; positions that are not a
/// known group are skipped.
pub fn group_names(groups: Bitfield) -> Vec<String> {
    groups
        .positions()
        .map(Group::from_u32)
        .filter(|group| *group != Group::Unknown)
        .map(|group| group.to_string())
        .collect()
}

/// One method per role
///
/// [`Daemon`](crate::Daemon) implements this by creating a queued
/// transaction for the request. [`Transaction`](crate::Transaction)
/// implements it by issuing the request on an already created transaction.
/// Both only differ in [`RoleRequests::issue`].
pub trait RoleRequests {
    /// What issuing a request produces
    type Output;

    /// Issues a prepared request
    fn issue(&self, request: TransactionRequest) -> Self::Output;

    fn accept_eula(&self, eula_id: impl Into<String>) -> Self::Output {
        self.issue(TransactionRequest::AcceptEula {
            eula_id: eula_id.into(),
        })
    }

    fn depends_on<I, S>(&self, filters: Filters, package_ids: I, recursive: bool) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::DependsOn {
            filters,
            package_ids: strings(package_ids),
            recursive,
        })
    }

    fn download_packages<I, S>(&self, store_in_cache: bool, package_ids: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::DownloadPackages {
            store_in_cache,
            package_ids: strings(package_ids),
        })
    }

    fn get_categories(&self) -> Self::Output {
        self.issue(TransactionRequest::GetCategories)
    }

    fn get_details<I, S>(&self, package_ids: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::GetDetails {
            package_ids: strings(package_ids),
        })
    }

    fn get_details_local<I, S>(&self, files: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::GetDetailsLocal {
            files: strings(files),
        })
    }

    fn get_distro_upgrades(&self) -> Self::Output {
        self.issue(TransactionRequest::GetDistroUpgrades)
    }

    fn get_files<I, S>(&self, package_ids: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::GetFiles {
            package_ids: strings(package_ids),
        })
    }

    fn get_files_local<I, S>(&self, files: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::GetFilesLocal {
            files: strings(files),
        })
    }

    /// The last `number` transactions, or all of them for 0
    fn get_old_transactions(&self, number: u32) -> Self::Output {
        self.issue(TransactionRequest::GetOldTransactions { number })
    }

    fn get_packages(&self, filters: Filters) -> Self::Output {
        self.issue(TransactionRequest::GetPackages { filters })
    }

    fn get_repo_list(&self, filters: Filters) -> Self::Output {
        self.issue(TransactionRequest::GetRepoList { filters })
    }

    fn get_update_detail<I, S>(&self, package_ids: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::GetUpdateDetail {
            package_ids: strings(package_ids),
        })
    }

    fn get_updates(&self, filters: Filters) -> Self::Output {
        self.issue(TransactionRequest::GetUpdates { filters })
    }

    fn install_files<I, S>(&self, flags: TransactionFlags, files: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::InstallFiles {
            flags,
            files: strings(files),
        })
    }

    fn install_packages<I, S>(&self, flags: TransactionFlags, package_ids: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::InstallPackages {
            flags,
            package_ids: strings(package_ids),
        })
    }

    fn install_signature(
        &self,
        sig_type: SigType,
        key_id: impl Into<String>,
        package_id: impl Into<String>,
    ) -> Self::Output {
        self.issue(TransactionRequest::InstallSignature {
            sig_type,
            key_id: key_id.into(),
            package_id: package_id.into(),
        })
    }

    fn refresh_cache(&self, force: bool) -> Self::Output {
        self.issue(TransactionRequest::RefreshCache { force })
    }

    fn remove_packages<I, S>(
        &self,
        flags: TransactionFlags,
        package_ids: I,
        allow_deps: bool,
        autoremove: bool,
    ) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::RemovePackages {
            flags,
            package_ids: strings(package_ids),
            allow_deps,
            autoremove,
        })
    }

    fn repair_system(&self, flags: TransactionFlags) -> Self::Output {
        self.issue(TransactionRequest::RepairSystem { flags })
    }

    fn repo_enable(&self, repo_id: impl Into<String>, enabled: bool) -> Self::Output {
        self.issue(TransactionRequest::RepoEnable {
            repo_id: repo_id.into(),
            enabled,
        })
    }

    fn repo_remove(
        &self,
        flags: TransactionFlags,
        repo_id: impl Into<String>,
        autoremove: bool,
    ) -> Self::Output {
        self.issue(TransactionRequest::RepoRemove {
            flags,
            repo_id: repo_id.into(),
            autoremove,
        })
    }

    fn repo_set_data(
        &self,
        repo_id: impl Into<String>,
        parameter: impl Into<String>,
        value: impl Into<String>,
    ) -> Self::Output {
        self.issue(TransactionRequest::RepoSetData {
            repo_id: repo_id.into(),
            parameter: parameter.into(),
            value: value.into(),
        })
    }

    fn required_by<I, S>(&self, filters: Filters, package_ids: I, recursive: bool) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::RequiredBy {
            filters,
            package_ids: strings(package_ids),
            recursive,
        })
    }

    fn resolve<I, S>(&self, filters: Filters, packages: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::Resolve {
            filters,
            packages: strings(packages),
        })
    }

    fn search_details<I, S>(&self, filters: Filters, values: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::SearchDetails {
            filters,
            values: strings(values),
        })
    }

    fn search_files<I, S>(&self, filters: Filters, values: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::SearchFiles {
            filters,
            values: strings(values),
        })
    }

    /// Searches by group names in their wire form
    fn search_groups<I, S>(&self, filters: Filters, groups: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::SearchGroups {
            filters,
            values: strings(groups),
        })
    }

    fn search_group(&self, filters: Filters, group: Group) -> Self::Output {
        self.search_groups(filters, [group.to_string()])
    }

    /// Searches every group in a position bitfield
    fn search_group_set(&self, filters: Filters, groups: Bitfield) -> Self::Output {
        self.search_groups(filters, group_names(groups))
    }

    fn search_names<I, S>(&self, filters: Filters, values: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::SearchNames {
            filters,
            values: strings(values),
        })
    }

    fn update_packages<I, S>(&self, flags: TransactionFlags, package_ids: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::UpdatePackages {
            flags,
            package_ids: strings(package_ids),
        })
    }

    fn upgrade_system(
        &self,
        flags: TransactionFlags,
        distro_id: impl Into<String>,
        kind: UpgradeKind,
    ) -> Self::Output {
        self.issue(TransactionRequest::UpgradeSystem {
            flags,
            distro_id: distro_id.into(),
            kind,
        })
    }

    fn what_provides<I, S>(&self, filters: Filters, values: I) -> Self::Output
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue(TransactionRequest::WhatProvides {
            filters,
            values: strings(values),
        })
    }
}
