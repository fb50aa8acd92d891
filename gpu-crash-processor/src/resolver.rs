use gpu_crash_common::ids::{DebugInfoId, ShaderHash};
use shader_symbols::{ShaderRecord, SymbolDatabase, SymbolRecord};

/// Lookups used while decoding a crash dump.
///
/// Everything is optional: a resolver that knows nothing still produces a
/// complete report, just with fewer names and paths in it.
pub trait ShaderResolver {
    /// The shader binary whose contents hash to `hash`.
    fn find_binary(&self, _hash: ShaderHash) -> Option<&ShaderRecord> {
        None
    }

    /// A symbol file by debug name.
    fn find_symbols(&self, _debug_name: &str) -> Option<&SymbolRecord> {
        None
    }

    /// Whether the shader debug info blob `id` was received.
    fn has_debug_info(&self, _id: DebugInfoId) -> bool {
        false
    }

    /// The label the application registered for an event marker token.
    fn resolve_marker(&self, _token: u64) -> Option<String> {
        None
    }
}

/// A resolver that knows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoResolver;

impl ShaderResolver for NoResolver {}

impl ShaderResolver for SymbolDatabase {
    fn find_binary(&self, hash: ShaderHash) -> Option<&ShaderRecord> {
        SymbolDatabase::find_binary(self, hash)
    }

    fn find_symbols(&self, debug_name: &str) -> Option<&SymbolRecord> {
        self.find_pdb(debug_name)
    }
}
