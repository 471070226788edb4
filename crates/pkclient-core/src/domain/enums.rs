//! Wire enumerations shared with the package service
//!
//! Numeric values match the service's headers, since most signals carry
//! these as `u32`. Every domain implements [`WireEnum`] so values can be
//! converted to and from their string form, and every domain has a
//! designated fallback for numbers and strings it does not recognise.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::enum_string::{enum_to_string, WireEnum};

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $prefix:literal, unknown = $unknown:ident $(, negatable = $neg:literal)? {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u32)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            /// Every variant in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Converts a wire number, falling back to the unknown variant
            pub fn from_u32(value: u32) -> Self {
                $(
                    if value == $value {
                        return $name::$variant;
                    }
                )+
                $name::$unknown
            }

            /// The wire number of this variant
            pub fn as_u32(self) -> u32 {
                self as u32
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$unknown
            }
        }

        impl WireEnum for $name {
            const PREFIX: &'static str = $prefix;
            $(const NEGATABLE: bool = $neg;)?

            fn keys() -> &'static [(&'static str, Self)] {
                &[$((concat!($prefix, stringify!($variant)), $name::$variant)),+]
            }

            fn unknown() -> Self {
                $name::$unknown
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&enum_to_string(*self))
            }
        }
    };
}

wire_enum! {
    /// The kind of operation a transaction performs
    pub enum Role: "Role", unknown = Unknown {
        Unknown = 0,
        Cancel = 1,
        DependsOn = 2,
        GetDetails = 3,
        GetFiles = 4,
        GetPackages = 5,
        GetRepoList = 6,
        RequiredBy = 7,
        GetUpdateDetail = 8,
        GetUpdates = 9,
        InstallFiles = 10,
        InstallPackages = 11,
        InstallSignature = 12,
        RefreshCache = 13,
        RemovePackages = 14,
        RepoEnable = 15,
        RepoSetData = 16,
        Resolve = 17,
        SearchDetails = 18,
        SearchFile = 19,
        SearchGroup = 20,
        SearchName = 21,
        UpdatePackages = 22,
        WhatProvides = 23,
        AcceptEula = 24,
        DownloadPackages = 25,
        GetDistroUpgrades = 26,
        GetCategories = 27,
        GetOldTransactions = 28,
        RepairSystem = 29,
        GetDetailsLocal = 30,
        GetFilesLocal = 31,
        RepoRemove = 32,
        UpgradeSystem = 33,
    }
}

wire_enum! {
    /// Domain errors reported by the service through `ErrorCode`
    pub enum ErrorCode: "Error", unknown = Unknown {
        Unknown = 0,
        Oom = 1,
        NoNetwork = 2,
        NotSupported = 3,
        InternalError = 4,
        GpgFailure = 5,
        PackageIdInvalid = 6,
        PackageNotInstalled = 7,
        PackageNotFound = 8,
        PackageAlreadyInstalled = 9,
        PackageDownloadFailed = 10,
        GroupNotFound = 11,
        GroupListInvalid = 12,
        DepResolutionFailed = 13,
        FilterInvalid = 14,
        CreateThreadFailed = 15,
        TransactionError = 16,
        TransactionCancelled = 17,
        NoCache = 18,
        RepoNotFound = 19,
        CannotRemoveSystemPackage = 20,
        ProcessKill = 21,
        FailedInitialization = 22,
        FailedFinalise = 23,
        FailedConfigParsing = 24,
        CannotCancel = 25,
        CannotGetLock = 26,
        NoPackagesToUpdate = 27,
        CannotWriteRepoConfig = 28,
        LocalInstallFailed = 29,
        BadGpgSignature = 30,
        MissingGpgSignature = 31,
        CannotInstallSourcePackage = 32,
        RepoConfigurationError = 33,
        NoLicenseAgreement = 34,
        FileConflicts = 35,
        PackageConflicts = 36,
        RepoNotAvailable = 37,
        InvalidPackageFile = 38,
        PackageInstallBlocked = 39,
        PackageCorrupt = 40,
        AllPackagesAlreadyInstalled = 41,
        FileNotFound = 42,
        NoMoreMirrorsToTry = 43,
        NoDistroUpgradeData = 44,
        IncompatibleArchitecture = 45,
        NoSpaceOnDevice = 46,
        MediaChangeRequired = 47,
        NotAuthorized = 48,
        UpdateNotFound = 49,
        CannotInstallRepoUnsigned = 50,
        CannotUpdateRepoUnsigned = 51,
        CannotGetFilelist = 52,
        CannotGetRequires = 53,
        CannotDisableRepository = 54,
        RestrictedDownload = 55,
        PackageFailedToConfigure = 56,
        PackageFailedToBuild = 57,
        PackageFailedToInstall = 58,
        PackageFailedToRemove = 59,
        UpdateFailedDueToRunningProcess = 60,
        PackageDatabaseChanged = 61,
        ProvideTypeNotSupported = 62,
        InstallRootInvalid = 63,
        CannotFetchSources = 64,
        CancelledPriority = 65,
        UnfinishedTransaction = 66,
        LockRequired = 67,
    }
}

wire_enum! {
    /// How a transaction ended
    pub enum Exit: "Exit", unknown = Unknown {
        Unknown = 0,
        Success = 1,
        Failed = 2,
        Cancelled = 3,
        KeyRequired = 4,
        EulaRequired = 5,
        /// The service forced the cancel with a kill
        Killed = 6,
        MediaChangeRequired = 7,
        NeedUntrusted = 8,
        CancelledPriority = 9,
        RepairRequired = 10,
    }
}

wire_enum! {
    /// One package filter; combine them with [`Filters`](super::flags::Filters)
    pub enum Filter: "Filter", unknown = Unknown, negatable = true {
        Unknown = 0x0000001,
        None = 0x0000002,
        Installed = 0x0000004,
        NotInstalled = 0x0000008,
        Devel = 0x0000010,
        NotDevel = 0x0000020,
        Gui = 0x0000040,
        NotGui = 0x0000080,
        Free = 0x0000100,
        NotFree = 0x0000200,
        Visible = 0x0000400,
        NotVisible = 0x0000800,
        Supported = 0x0001000,
        NotSupported = 0x0002000,
        Basename = 0x0004000,
        NotBasename = 0x0008000,
        Newest = 0x0010000,
        NotNewest = 0x0020000,
        Arch = 0x0040000,
        NotArch = 0x0080000,
        Source = 0x0100000,
        NotSource = 0x0200000,
        Collections = 0x0400000,
        NotCollections = 0x0800000,
        Application = 0x1000000,
        NotApplication = 0x2000000,
        Downloaded = 0x4000000,
        NotDownloaded = 0x8000000,
    }
}

wire_enum! {
    /// What a transaction is doing right now
    pub enum Status: "Status", unknown = Unknown {
        Unknown = 0,
        Wait = 1,
        Setup = 2,
        Running = 3,
        Query = 4,
        Info = 5,
        Remove = 6,
        RefreshCache = 7,
        Download = 8,
        Install = 9,
        Update = 10,
        Cleanup = 11,
        Obsolete = 12,
        DepResolve = 13,
        SigCheck = 14,
        TestCommit = 15,
        Commit = 16,
        Request = 17,
        Finished = 18,
        Cancel = 19,
        DownloadRepository = 20,
        DownloadPackagelist = 21,
        DownloadFilelist = 22,
        DownloadChangelog = 23,
        DownloadGroup = 24,
        DownloadUpdateinfo = 25,
        Repackaging = 26,
        LoadingCache = 27,
        ScanApplications = 28,
        GeneratePackageList = 29,
        WaitingForLock = 30,
        WaitingForAuth = 31,
        ScanProcessList = 32,
        CheckExecutableFiles = 33,
        CheckLibraries = 34,
        CopyFiles = 35,
        RunHook = 36,
    }
}

wire_enum! {
    pub enum MediaType: "MediaType", unknown = Unknown {
        Unknown = 0,
        Cd = 1,
        Dvd = 2,
        Disc = 3,
    }
}

wire_enum! {
    pub enum DistroUpgrade: "DistroUpgrade", unknown = Unknown {
        Unknown = 0,
        Stable = 1,
        Unstable = 2,
    }
}

wire_enum! {
    pub enum UpgradeKind: "UpgradeKind", unknown = Unknown {
        Unknown = 0,
        Minimal = 1,
        Default = 2,
        Complete = 3,
    }
}

wire_enum! {
    /// One transaction flag; combine them with [`TransactionFlags`](super::flags::TransactionFlags)
    pub enum TransactionFlag: "TransactionFlag", unknown = None {
        None = 1 << 0,
        OnlyTrusted = 1 << 1,
        Simulate = 1 << 2,
        OnlyDownload = 1 << 3,
        AllowReinstall = 1 << 4,
        JustReinstall = 1 << 5,
        AllowDowngrade = 1 << 6,
    }
}

wire_enum! {
    /// What has to be restarted after a package change
    pub enum Restart: "Restart", unknown = Unknown {
        Unknown = 0,
        None = 1,
        Application = 2,
        Session = 3,
        System = 4,
        /// A library used by the session was updated for security
        SecuritySession = 5,
        SecuritySystem = 6,
    }
}

wire_enum! {
    pub enum UpdateState: "UpdateState", unknown = Unknown {
        Unknown = 0,
        Stable = 1,
        Unstable = 2,
        Testing = 3,
    }
}

wire_enum! {
    /// Package group; the service advertises the supported set as a
    /// [`Bitfield`](super::flags::Bitfield) of these positions
    pub enum Group: "Group", unknown = Unknown {
        Unknown = 0,
        Accessibility = 1,
        Accessories = 2,
        AdminTools = 3,
        Communication = 4,
        DesktopGnome = 5,
        DesktopKde = 6,
        DesktopOther = 7,
        DesktopXfce = 8,
        Education = 9,
        Fonts = 10,
        Games = 11,
        Graphics = 12,
        Internet = 13,
        Legacy = 14,
        Localization = 15,
        Maps = 16,
        Multimedia = 17,
        Network = 18,
        Office = 19,
        Other = 20,
        PowerManagement = 21,
        Programming = 22,
        Publishing = 23,
        Repos = 24,
        Security = 25,
        Servers = 26,
        System = 27,
        Virtualization = 28,
        Science = 29,
        Documentation = 30,
        Electronics = 31,
        Collections = 32,
        Vendor = 33,
        Newest = 34,
    }
}

wire_enum! {
    /// Package state or update severity carried by `Package` signals
    pub enum Info: "Info", unknown = Unknown {
        Unknown = 0,
        Installed = 1,
        Available = 2,
        Low = 3,
        Enhancement = 4,
        Normal = 5,
        Bugfix = 6,
        Important = 7,
        Security = 8,
        Blocked = 9,
        Downloading = 10,
        Updating = 11,
        Installing = 12,
        Removing = 13,
        Cleanup = 14,
        Obsoleting = 15,
        CollectionInstalled = 16,
        CollectionAvailable = 17,
        Finished = 18,
        Reinstalling = 19,
        Downgrading = 20,
        Preparing = 21,
        Decompressing = 22,
        Untrusted = 23,
        Trusted = 24,
        Unavailable = 25,
    }
}

wire_enum! {
    pub enum SigType: "SigType", unknown = Unknown {
        Unknown = 0,
        Gpg = 1,
    }
}

wire_enum! {
    /// Network state as seen by the service
    pub enum Network: "Network", unknown = Unknown {
        Unknown = 0,
        Offline = 1,
        Online = 2,
        Wired = 3,
        Wifi = 4,
        Mobile = 5,
    }
}

wire_enum! {
    /// Answer of `CanAuthorize`
    pub enum Authorize: "Authorize", unknown = Unknown {
        Unknown = 0,
        Yes = 1,
        No = 2,
        Interactive = 3,
    }
}

wire_enum! {
    /// What happens after offline updates are applied
    pub enum OfflineAction: "Action", unknown = Unset {
        Unset = 0,
        PowerOff = 1,
        Reboot = 2,
    }
}
