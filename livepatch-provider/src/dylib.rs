//! Provider reached through a dynamically loaded library.
//!
//! All entry points are resolved once, at [`DylibProvider::open`]; a missing
//! required symbol fails there, never at call time. The library stays
//! loaded for as long as the provider value lives.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::Library;

use livepatch_core::{PatchNumber, ReloadContext, ReloadResult};

use crate::abi::{
    AttachLogFn, CreateReloaderFn, DetachLogFn, PatchNumberFn, RawReloadContext,
    RawReloadResult, RawStr, ReloadSymbolsFn, SelfTestFn, ATTACH_LOG, CREATE_RELOADER,
    DETACH_LOG, PATCH_NUMBER, RELOAD_SYMBOLS, SELF_TEST, SYMBOLS,
};
use crate::error::ProviderError;
use crate::log_bridge::HOST_SINK;
use crate::provider::Provider;

/// Resolved provider entry points.
#[derive(Debug, Clone, Copy)]
pub struct ProviderApi {
    pub create_reloader: CreateReloaderFn,
    pub patch_number: PatchNumberFn,
    pub reload_symbols: ReloadSymbolsFn,
    pub attach_log: Option<AttachLogFn>,
    pub detach_log: Option<DetachLogFn>,
    pub self_test: Option<SelfTestFn>,
}

impl ProviderApi {
    /// Look every entry point up in `library`.
    ///
    /// # Safety
    /// Symbols with these names must have the signatures in [`crate::abi`].
    pub unsafe fn resolve(library: &Library) -> Result<Self, ProviderError> {
        unsafe {
            Ok(Self {
                create_reloader: required(library, CREATE_RELOADER)?,
                patch_number: required(library, PATCH_NUMBER)?,
                reload_symbols: required(library, RELOAD_SYMBOLS)?,
                attach_log: optional(library, ATTACH_LOG),
                detach_log: optional(library, DETACH_LOG),
                self_test: optional(library, SELF_TEST),
            })
        }
    }
}

unsafe fn required<T: Copy>(library: &Library, symbol: &'static str) -> Result<T, ProviderError> {
    // SAFETY: forwarded from `ProviderApi::resolve`.
    unsafe { library.get::<T>(symbol.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|source| ProviderError::MissingSymbol { symbol, source })
}

unsafe fn optional<T: Copy>(library: &Library, symbol: &'static str) -> Option<T> {
    // SAFETY: forwarded from `ProviderApi::resolve`.
    match unsafe { library.get::<T>(symbol.as_bytes()) } {
        Ok(sym) => Some(*sym),
        Err(_) => {
            tracing::debug!(symbol, "optional provider symbol not present");
            None
        }
    }
}

fn open_library(path: &Path) -> Result<Library, ProviderError> {
    // SAFETY: loading runs the library's initializers; the provider is
    // trusted code built alongside the reloadee.
    unsafe { Library::new(path) }.map_err(|source| ProviderError::Load {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolution status of one entry point, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolStatus {
    pub name: &'static str,
    pub required: bool,
    pub resolved: bool,
}

/// Report which entry points `path` exports, without failing on missing ones.
pub fn probe(path: &Path) -> Result<Vec<SymbolStatus>, ProviderError> {
    let library = open_library(path)?;
    Ok(SYMBOLS
        .iter()
        .map(|&(name, required)| SymbolStatus {
            name,
            required,
            // SAFETY: only the address is looked up; nothing is called.
            resolved: unsafe { library.get::<*const c_void>(name.as_bytes()) }.is_ok(),
        })
        .collect())
}

pub struct DylibProvider {
    api: ProviderApi,
    reloader: NonNull<c_void>,
    last_patch: Option<PatchNumber>,
    log_attached: bool,
    path: Option<PathBuf>,
    // Declared last so it is unloaded after everything that calls into it.
    _library: Option<Library>,
}

impl std::fmt::Debug for DylibProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DylibProvider")
            .field("path", &self.path)
            .field("last_patch", &self.last_patch)
            .field("log_attached", &self.log_attached)
            .finish_non_exhaustive()
    }
}

impl DylibProvider {
    /// Load the provider at `path`, resolve its entry points, and create its
    /// reloader state.
    pub fn open(path: &Path) -> Result<Self, ProviderError> {
        let library = open_library(path)?;
        // SAFETY: the ABI module documents the expected signatures.
        let api = unsafe { ProviderApi::resolve(&library)? };
        // SAFETY: `library` is moved into the provider below and outlives
        // every call through `api`.
        let mut provider = unsafe { Self::from_api(api)? };
        provider.path = Some(path.to_path_buf());
        provider._library = Some(library);
        tracing::info!(path = %path.display(), "provider loaded");
        Ok(provider)
    }

    /// Build a provider from entry points resolved elsewhere, e.g. a provider
    /// linked into the host.
    ///
    /// # Safety
    /// Every function pointer in `api` must stay callable for the lifetime of
    /// the returned value.
    pub unsafe fn from_api(api: ProviderApi) -> Result<Self, ProviderError> {
        // SAFETY: guaranteed by the caller.
        let raw = unsafe { (api.create_reloader)() };
        let reloader = NonNull::new(raw).ok_or(ProviderError::NullReloader)?;
        Ok(Self {
            api,
            reloader,
            last_patch: None,
            log_attached: false,
            path: None,
            _library: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Share the host's log sink with the provider. Returns whether the
    /// provider supports the hookup.
    pub fn attach_log(&mut self) -> bool {
        let Some(attach) = self.api.attach_log else {
            return false;
        };
        if !self.log_attached {
            // SAFETY: HOST_SINK is a static and outlives the provider.
            unsafe { attach(&HOST_SINK) };
            self.log_attached = true;
        }
        true
    }

    /// Run the provider's optional sanity hook.
    pub fn self_test(&self) -> Option<bool> {
        // SAFETY: resolved from the loaded library.
        self.api.self_test.map(|test| unsafe { test() })
    }

    pub fn api(&self) -> &ProviderApi {
        &self.api
    }
}

impl Provider for DylibProvider {
    fn patch_number(&mut self) -> PatchNumber {
        // SAFETY: the reloader handle came from this provider.
        let next = PatchNumber(unsafe { (self.api.patch_number)(self.reloader.as_ptr()) });
        if let Some(last) = self.last_patch {
            if next <= last {
                tracing::warn!(
                    last = last.0,
                    next = next.0,
                    "provider patch number did not increase; builds may collide"
                );
            }
        }
        self.last_patch = Some(next);
        next
    }

    fn reload_symbols(
        &mut self,
        context: ReloadContext<'_>,
    ) -> Result<ReloadResult, ProviderError> {
        let raw = RawReloadContext {
            definitions: RawStr::from_path(context.definitions),
            executable: RawStr::from_path(context.executable),
            reloadee_handle: context.reloadee.0,
            remappings: context.storage.as_mut_ptr(),
            remappings_capacity: context.storage.len() as u64,
        };
        let mut result = RawReloadResult::default();

        // SAFETY: every pointer in `raw` borrows from `context`, which lives
        // across the call; the provider must not retain them.
        let ok = unsafe { (self.api.reload_symbols)(self.reloader.as_ptr(), &raw, &mut result) };
        if !ok {
            return Err(ProviderError::ComputeFailed {
                patch: self.last_patch.map(|p| p.0).unwrap_or_default(),
            });
        }

        let written = usize::try_from(result.remappings_written).map_err(|_| {
            ProviderError::CountOverflow {
                written: result.remappings_written,
            }
        })?;
        Ok(ReloadResult {
            remappings_written: written,
        })
    }
}

impl Drop for DylibProvider {
    fn drop(&mut self) {
        if self.log_attached {
            if let Some(detach) = self.api.detach_log {
                // SAFETY: the library is still loaded; fields drop after this.
                unsafe { detach() };
            }
        }
    }
}
