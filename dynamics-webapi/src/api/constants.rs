//! Wire-level constants for the Dynamics 365 Web API

/// Web API version used when none is configured
pub const DEFAULT_API_VERSION: &str = "9.2";

/// Default chunk size for file uploads and downloads (4 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// GET requests with a longer absolute URL are sent through `$batch`
pub const DEFAULT_MAX_URL_LENGTH: usize = 2000;

/// Prefix of generated batch boundaries
pub const BATCH_BOUNDARY_PREFIX: &str = "dwa_batch_";

/// Prefix of generated change-set boundaries
pub const CHANGESET_BOUNDARY_PREFIX: &str = "changeset_";

/// Content-ID numbering inside a change set starts after this value
pub const CONTENT_ID_SEED: u32 = 100000;

pub mod headers {
    pub const ACCEPT: &str = "Accept";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CACHE_CONTROL: &str = "Cache-Control";
    pub const CALLER_OBJECT_ID: &str = "CallerObjectId";
    pub const CONTENT_ID: &str = "Content-ID";
    pub const CONTENT_RANGE: &str = "Content-Range";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const IF_MATCH: &str = "If-Match";
    pub const IF_NONE_MATCH: &str = "If-None-Match";
    pub const MSCRM_CALLER_ID: &str = "MSCRMCallerID";
    pub const MERGE_LABELS: &str = "MSCRM.MergeLabels";
    pub const SOLUTION_UNIQUE_NAME: &str = "MSCRM.SolutionUniqueName";
    pub const SUPPRESS_DUPLICATE_DETECTION: &str = "MSCRM.SuppressDuplicateDetection";
    pub const BYPASS_CUSTOM_PLUGIN_EXECUTION: &str = "MSCRM.BypassCustomPluginExecution";
    pub const BYPASS_BUSINESS_LOGIC_EXECUTION: &str = "MSCRM.BypassBusinessLogicExecution";
    pub const BYPASS_STEP_IDS: &str = "MSCRM.BypassBusinessLogicExecutionStepIds";
    pub const BYPASS_POWER_AUTOMATE_FLOWS: &str = "MSCRM.SuppressCallbackRegistrationExpanderJob";
    pub const ODATA_MAX_VERSION: &str = "OData-MaxVersion";
    pub const ODATA_VERSION: &str = "OData-Version";
    pub const PREFER: &str = "Prefer";
    pub const RANGE: &str = "Range";
    pub const TRANSFER_MODE: &str = "x-ms-transfer-mode";
    pub const FILE_NAME: &str = "x-ms-file-name";

    // Response headers, matched case-insensitively
    pub const ODATA_ENTITY_ID: &str = "OData-EntityId";
    pub const LOCATION: &str = "Location";
    pub const CHUNK_SIZE: &str = "x-ms-chunk-size";
    pub const FILE_SIZE: &str = "x-ms-file-size";
}

pub mod prefer {
    pub const RETURN_REPRESENTATION: &str = "return=representation";
    pub const INCLUDE_ANNOTATIONS: &str = "odata.include-annotations=";
    pub const MAX_PAGE_SIZE: &str = "odata.maxpagesize=";
    pub const TRACK_CHANGES: &str = "odata.track-changes";
    pub const CONTINUE_ON_ERROR: &str = "odata.continue-on-error";
}

pub mod annotations {
    pub const CONTEXT: &str = "@odata.context";
    pub const COUNT: &str = "@odata.count";
    pub const ETAG: &str = "@odata.etag";
    pub const NEXT_LINK: &str = "@odata.nextLink";
    pub const DELTA_LINK: &str = "@odata.deltaLink";
    pub const ID: &str = "@odata.id";
    pub const BIND_SUFFIX: &str = "@odata.bind";
    pub const FORMATTED_VALUE: &str = "OData.Community.Display.V1.FormattedValue";
    pub const ASSOCIATED_NAVIGATION_PROPERTY: &str =
        "Microsoft.Dynamics.CRM.associatednavigationproperty";
    pub const LOOKUP_LOGICAL_NAME: &str = "Microsoft.Dynamics.CRM.lookuplogicalname";
    pub const FETCHXML_PAGING_COOKIE: &str = "Microsoft.Dynamics.CRM.fetchxmlpagingcookie";
    pub const MORE_RECORDS: &str = "Microsoft.Dynamics.CRM.morerecords";
}
