use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("No base image given")]
    #[diagnostic(
        code(config::no_base_image),
        help("Pass --image or set base_image with `khpatch config set-base-image <path>`")
    )]
    NoBaseImage,

    #[error("Incomplete archive offsets")]
    #[diagnostic(
        code(args::incomplete_offsets),
        help("Pass --data-offset, --table-offset and --table-size together, or none of them to scan the image")
    )]
    IncompleteOffsets,

    #[error("Output would overwrite the base image: {path}")]
    #[diagnostic(
        code(args::output_is_input),
        help("Choose a different --output path")
    )]
    OutputIsInput { path: Utf8PathBuf },

    #[error("None of the {count} patch packages could be loaded")]
    #[diagnostic(
        code(patch::none_loaded),
        help("Check the warnings above for the reason each package was rejected")
    )]
    NoPackagesLoaded { count: usize },

    #[error("Cannot open base image {path}")]
    #[diagnostic(
        code(archive::open_failed),
        help("Make sure the image is an unmodified dump, or pass the archive offsets explicitly")
    )]
    BaseImage {
        path: Utf8PathBuf,
        #[source]
        source: khp_archive::ArchiveError,
    },

    #[error("Cannot load container layout {path}")]
    #[diagnostic(code(config::layout))]
    Layout {
        path: Utf8PathBuf,
        #[source]
        source: khp_archive::ArchiveError,
    },

    #[error("Invalid patch package {path}")]
    #[diagnostic(code(patch::invalid))]
    InvalidPackage {
        path: Utf8PathBuf,
        #[source]
        source: khp_patch::PatchError,
    },

    #[error("Rebuild cancelled")]
    #[diagnostic(
        code(rebuild::cancelled),
        help("The incomplete output was deleted")
    )]
    Cancelled,

    #[error("Rebuild failed")]
    #[diagnostic(code(rebuild::failed))]
    Rebuild {
        #[source]
        source: khp_overlay::Error,
    },

    #[error("Codec error")]
    #[diagnostic(code(codec::failed))]
    Codec {
        #[from]
        source: khp_codec::CodecError,
    },

    #[error("IO operation failed")]
    #[diagnostic(code(io::operation_failed))]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn base_image(path: Utf8PathBuf, source: khp_archive::ArchiveError) -> Self {
        Self::BaseImage { path, source }
    }

    pub fn layout(path: Utf8PathBuf, source: khp_archive::ArchiveError) -> Self {
        Self::Layout { path, source }
    }

    pub fn invalid_package(path: Utf8PathBuf, source: khp_patch::PatchError) -> Self {
        Self::InvalidPackage { path, source }
    }
}

impl From<khp_overlay::Error> for CliError {
    fn from(source: khp_overlay::Error) -> Self {
        match source {
            khp_overlay::Error::Cancelled => Self::Cancelled,
            source => Self::Rebuild { source },
        }
    }
}
