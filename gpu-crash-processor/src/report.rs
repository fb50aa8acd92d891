//! Decoding a GPU crash dump into a report, and printing it.

use std::io;
use std::io::prelude::*;
use std::path::PathBuf;
use std::time::SystemTime;

use gpu_dump::format::{DescriptionKey, ResourceFlags};
use gpu_dump::*;
use num_traits::FromPrimitive;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::resolver::ShaderResolver;

/// An active shader and whatever could be found for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedShader {
    pub shader: GpuDumpShader,
    /// Where the shader binary was found.
    pub binary_path: Option<PathBuf>,
    /// The debug name recorded in the shader binary.
    pub debug_name: Option<String>,
    /// Where the symbol file was found.
    pub symbols_path: Option<PathBuf>,
    /// Whether the debug info blob named by the dump was received.
    pub has_debug_info: bool,
}

/// An event marker with its text resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMarker {
    pub marker: GpuDumpEventMarker,
    /// The marker data, or the label the application registered for its payload.
    pub text: Option<String>,
}

/// Everything that could be decoded from one GPU crash dump.
///
/// Each section is `None` if the dump lacks it or it failed to decode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrashReport {
    pub time: Option<SystemTime>,
    pub base_info: Option<GpuDumpBaseInfo>,
    pub device_info: Option<GpuDumpDeviceInfo>,
    pub system_info: Option<GpuDumpSystemInfo>,
    pub gpu_info: Option<GpuDumpGpuInfoList>,
    pub page_fault: Option<GpuDumpPageFaultInfo>,
    pub active_shaders: Option<Vec<ResolvedShader>>,
    pub event_markers: Option<Vec<ResolvedMarker>>,
    pub description: Option<GpuDumpDescription>,
}

/// Keep a decoded section, logging why it is missing otherwise.
fn section<T>(name: &str, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(Error::StreamNotFound) => {
            debug!("crash dump has no {} section", name);
            None
        }
        Err(e) => {
            warn!("failed to decode {} section: {}", name, e);
            None
        }
    }
}

fn resolve_shader(shader: GpuDumpShader, resolver: &dyn ShaderResolver) -> ResolvedShader {
    let binary = resolver.find_binary(shader.hash);
    let debug_name = binary.and_then(|binary| binary.debug_name.clone());
    let symbols_path = debug_name
        .as_deref()
        .and_then(|name| resolver.find_symbols(name))
        .map(|symbols| symbols.path.clone());
    let has_debug_info = shader
        .debug_info_id
        .map_or(false, |id| resolver.has_debug_info(id));
    ResolvedShader {
        binary_path: binary.map(|binary| binary.path.clone()),
        debug_name,
        symbols_path,
        has_debug_info,
        shader,
    }
}

fn resolve_marker(marker: GpuDumpEventMarker, resolver: &dyn ShaderResolver) -> ResolvedMarker {
    let text = match marker.data {
        Some(_) => marker.data_str().map(str::to_owned),
        None if marker.payload != 0 => resolver.resolve_marker(marker.payload),
        None => None,
    };
    ResolvedMarker { marker, text }
}

fn format_time(time: SystemTime) -> Option<String> {
    OffsetDateTime::from(time).format(&Rfc3339).ok()
}

fn format_flags(flags: ResourceFlags) -> String {
    if flags.is_empty() {
        return "none".to_owned();
    }
    flags
        .iter_names()
        .map(|(name, _)| name)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn description_key_name(key: u32) -> String {
    match DescriptionKey::from_u32(key) {
        Some(known) => format!("{known:?}"),
        None => format!("{key:#x}"),
    }
}

impl CrashReport {
    /// Query every section of `decoder`, resolving shaders and markers with `resolver`.
    ///
    /// Sections are independent: a section that is missing or fails to decode is
    /// left out and the rest are still decoded.
    pub fn decode(decoder: &dyn DumpDecoder, resolver: &dyn ShaderResolver) -> CrashReport {
        let base_info = section("base info", decoder.base_info());
        let device_info = section("device info", decoder.device_info());
        let system_info = section("system info", decoder.system_info());
        let gpu_info = section("GPU info", decoder.gpu_info());
        let page_fault = section("page fault", decoder.page_fault_info());
        let active_shaders = section("active shader", decoder.active_shaders()).map(|list| {
            list.shaders
                .into_iter()
                .map(|shader| resolve_shader(shader, resolver))
                .collect()
        });
        let event_markers = section("event marker", decoder.event_markers()).map(|list| {
            list.markers
                .into_iter()
                .map(|marker| resolve_marker(marker, resolver))
                .collect()
        });
        let description = section("description", decoder.description());
        CrashReport {
            time: decoder.time(),
            base_info,
            device_info,
            system_info,
            gpu_info,
            page_fault,
            active_shaders,
            event_markers,
            description,
        }
    }

    /// Write a human-readable report to `f`.
    pub fn print<T: Write + ?Sized>(&self, f: &mut T) -> io::Result<()> {
        writeln!(f, "GPU crash dump")?;
        if let Some(time) = self.time.and_then(format_time) {
            writeln!(f, "Captured: {time}")?;
        }
        if let Some(ref base) = self.base_info {
            writeln!(f, "Graphics API: {:?}", base.graphics_api)?;
            writeln!(f, "Process: {}", base.pid)?;
        }
        writeln!(f)?;

        if let Some(ref device) = self.device_info {
            writeln!(f, "Device status: {:?}", device.status)?;
            writeln!(f, "Adapter reset: {}", device.adapter_reset)?;
            writeln!(f, "Engine reset: {}", device.engine_reset)?;
            writeln!(f)?;
        }

        if let Some(ref system) = self.system_info {
            writeln!(
                f,
                "Operating system: {}",
                system.os_version.as_deref().unwrap_or("unknown")
            )?;
            writeln!(f, "Driver: {}.{}", system.driver_major, system.driver_minor)?;
            writeln!(f)?;
        }

        if let Some(ref gpus) = self.gpu_info {
            writeln!(f, "GPUs ({}):", gpus.gpus.len())?;
            for (idx, gpu) in gpus.gpus.iter().enumerate() {
                writeln!(
                    f,
                    "  {idx}. {} ({}), LUID {:#x}",
                    gpu.adapter_name.as_deref().unwrap_or("unknown adapter"),
                    gpu.generation_name.as_deref().unwrap_or("unknown generation"),
                    gpu.adapter_luid
                )?;
            }
            writeln!(f)?;
        }

        if let Some(ref fault) = self.page_fault {
            writeln!(f, "Page fault:")?;
            writeln!(f, "  Address: {:#018x}", fault.faulting_gpu_va)?;
            writeln!(f, "  Type: {:?}", fault.fault_type)?;
            writeln!(f, "  Access: {:?}", fault.access_type)?;
            writeln!(f, "  Engine: {}, client: {}", fault.engine, fault.client)?;
            writeln!(f, "  Resources ({}):", fault.resources.len())?;
            for (idx, resource) in fault.resources.iter().enumerate() {
                writeln!(
                    f,
                    "    {idx}. {:#018x} size {:#x}: {}x{}x{}, {} mips, format {}, {}{}",
                    resource.gpu_va,
                    resource.size,
                    resource.width,
                    resource.height,
                    resource.depth,
                    resource.mip_levels,
                    resource.format,
                    format_flags(resource.flags),
                    resource
                        .debug_name
                        .as_ref()
                        .map(|name| format!(" \"{name}\""))
                        .unwrap_or_default()
                )?;
            }
            writeln!(f)?;
        }

        if let Some(ref shaders) = self.active_shaders {
            writeln!(f, "Active shaders ({}):", shaders.len())?;
            for (idx, resolved) in shaders.iter().enumerate() {
                let shader = &resolved.shader;
                writeln!(
                    f,
                    "  {idx}. {:?} shader {} instance {:#x}{}",
                    shader.shader_type,
                    shader.hash,
                    shader.instance,
                    if shader.is_internal { " (internal)" } else { "" }
                )?;
                match resolved.binary_path {
                    Some(ref path) => writeln!(f, "       binary: {}", path.display())?,
                    None => writeln!(f, "       binary: not found")?,
                }
                if let Some(ref name) = resolved.debug_name {
                    writeln!(f, "       debug name: {name}")?;
                }
                if let Some(ref path) = resolved.symbols_path {
                    writeln!(f, "       symbols: {}", path.display())?;
                }
                if let Some(id) = shader.debug_info_id {
                    writeln!(
                        f,
                        "       debug info: {id}{}",
                        if resolved.has_debug_info { "" } else { " (not received)" }
                    )?;
                }
            }
            writeln!(f)?;
        }

        if let Some(ref markers) = self.event_markers {
            writeln!(f, "Event markers ({}):", markers.len())?;
            for (idx, resolved) in markers.iter().enumerate() {
                let marker = &resolved.marker;
                writeln!(
                    f,
                    "  {idx}. context {:#x} ({:?}, {:?}): {}",
                    marker.context_id,
                    marker.context_type,
                    marker.context_status,
                    match resolved.text {
                        Some(ref text) => format!("\"{text}\""),
                        None => format!("payload {:#x}", marker.payload),
                    }
                )?;
            }
            writeln!(f)?;
        }

        if let Some(ref description) = self.description {
            writeln!(f, "Description:")?;
            for entry in &description.entries {
                writeln!(f, "  {}: {}", description_key_name(entry.key), entry.value)?;
            }
        }
        Ok(())
    }

    /// The report as a JSON object with one key per present section.
    pub fn to_json(&self) -> serde_json::Value {
        fn json_hex(value: u64) -> String {
            format!("{value:#x}")
        }

        let mut output = serde_json::Map::new();
        if let Some(time) = self.time.and_then(format_time) {
            output.insert("time".into(), json!(time));
        }
        if let Some(ref base) = self.base_info {
            output.insert(
                "base_info".into(),
                json!({
                    "graphics_api": format!("{:?}", base.graphics_api),
                    "pid": base.pid,
                }),
            );
        }
        if let Some(ref device) = self.device_info {
            output.insert(
                "device_info".into(),
                json!({
                    "status": format!("{:?}", device.status),
                    "adapter_reset": device.adapter_reset,
                    "engine_reset": device.engine_reset,
                }),
            );
        }
        if let Some(ref system) = self.system_info {
            output.insert(
                "system_info".into(),
                json!({
                    "os_version": system.os_version,
                    "driver_version": format!("{}.{}", system.driver_major, system.driver_minor),
                }),
            );
        }
        if let Some(ref gpus) = self.gpu_info {
            output.insert(
                "gpu_info".into(),
                gpus.gpus
                    .iter()
                    .map(|gpu| {
                        json!({
                            "adapter_name": gpu.adapter_name,
                            "generation_name": gpu.generation_name,
                            "adapter_luid": json_hex(gpu.adapter_luid),
                        })
                    })
                    .collect(),
            );
        }
        if let Some(ref fault) = self.page_fault {
            output.insert(
                "page_fault".into(),
                json!({
                    "faulting_gpu_va": json_hex(fault.faulting_gpu_va),
                    "fault_type": format!("{:?}", fault.fault_type),
                    "access_type": format!("{:?}", fault.access_type),
                    "engine": fault.engine,
                    "client": fault.client,
                    "resources": fault.resources.iter().map(|resource| json!({
                        "gpu_va": json_hex(resource.gpu_va),
                        "size": resource.size,
                        "width": resource.width,
                        "height": resource.height,
                        "depth": resource.depth,
                        "mip_levels": resource.mip_levels,
                        "format": resource.format,
                        "flags": resource.flags.iter_names().map(|(name, _)| name).collect::<Vec<_>>(),
                        "debug_name": resource.debug_name,
                    })).collect::<Vec<_>>(),
                }),
            );
        }
        if let Some(ref shaders) = self.active_shaders {
            output.insert(
                "active_shaders".into(),
                shaders
                    .iter()
                    .map(|resolved| {
                        let shader = &resolved.shader;
                        json!({
                            "hash": shader.hash.to_string(),
                            "instance": json_hex(shader.instance),
                            "shader_type": format!("{:?}", shader.shader_type),
                            "is_internal": shader.is_internal,
                            "debug_info_id": shader.debug_info_id.map(|id| id.to_string()),
                            "has_debug_info": resolved.has_debug_info,
                            "binary_path": resolved.binary_path.as_ref().map(|p| p.display().to_string()),
                            "debug_name": resolved.debug_name,
                            "symbols_path": resolved.symbols_path.as_ref().map(|p| p.display().to_string()),
                        })
                    })
                    .collect(),
            );
        }
        if let Some(ref markers) = self.event_markers {
            output.insert(
                "event_markers".into(),
                markers
                    .iter()
                    .map(|resolved| {
                        let marker = &resolved.marker;
                        json!({
                            "context_id": json_hex(marker.context_id),
                            "context_type": format!("{:?}", marker.context_type),
                            "context_status": format!("{:?}", marker.context_status),
                            "payload": json_hex(marker.payload),
                            "text": resolved.text,
                        })
                    })
                    .collect(),
            );
        }
        if let Some(ref description) = self.description {
            let entries: serde_json::Map<_, _> = description
                .entries
                .iter()
                .map(|entry| (description_key_name(entry.key), json!(entry.value)))
                .collect();
            output.insert("description".into(), serde_json::Value::Object(entries));
        }
        serde_json::Value::Object(output)
    }

    /// Write the report as JSON to `f`.
    pub fn print_json<T: Write>(&self, f: &mut T, pretty: bool) -> Result<(), serde_json::Error> {
        let output = self.to_json();
        if pretty {
            serde_json::to_writer_pretty(f, &output)
        } else {
            serde_json::to_writer(f, &output)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_flags() {
        assert_eq!(format_flags(ResourceFlags::empty()), "none");
        assert_eq!(
            format_flags(ResourceFlags::BUFFER_HEAP | ResourceFlags::WAS_DESTROYED),
            "BUFFER_HEAP | WAS_DESTROYED"
        );
    }

    #[test]
    fn test_description_key_name() {
        assert_eq!(description_key_name(1), "ApplicationName");
        assert_eq!(description_key_name(0x10001), "0x10001");
    }

    #[test]
    fn test_format_time() {
        let time = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        assert_eq!(format_time(time).as_deref(), Some("2023-11-14T22:13:20Z"));
    }
}
