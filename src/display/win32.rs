//! Display backend over the Win32 GDI and display-config APIs.
//!
//! Ids are monitor device interface paths (`\\?\DISPLAY#...`), which stay
//! stable across reboots and port changes unlike `\\.\DISPLAYn` names.

use std::mem::size_of;

use windows::core::PCWSTR;
use windows::Win32::Devices::Display::{
    DisplayConfigGetDeviceInfo, DisplayConfigSetDeviceInfo, GetDisplayConfigBufferSizes,
    QueryDisplayConfig, SetDisplayConfig, DISPLAYCONFIG_DEVICE_INFO_GET_TARGET_NAME,
    DISPLAYCONFIG_DEVICE_INFO_HEADER, DISPLAYCONFIG_DEVICE_INFO_TYPE, DISPLAYCONFIG_MODE_INFO,
    DISPLAYCONFIG_PATH_INFO, DISPLAYCONFIG_SCALING_ASPECTRATIOCENTEREDMAX,
    DISPLAYCONFIG_SCALING_CENTERED, DISPLAYCONFIG_SCALING_STRETCHED,
    DISPLAYCONFIG_TARGET_DEVICE_NAME, QDC_ONLY_ACTIVE_PATHS, SDC_APPLY, SDC_SAVE_TO_DATABASE,
    SDC_USE_SUPPLIED_DISPLAY_CONFIG,
};
use windows::Win32::Foundation::{ERROR_SUCCESS, HWND, LUID};
use windows::Win32::Graphics::Gdi::{
    ChangeDisplaySettingsExW, EnumDisplayDevicesW, EnumDisplaySettingsW, CDS_UPDATEREGISTRY,
    DEVMODEW, DEVMODE_DISPLAY_ORIENTATION, DISPLAY_DEVICEW, DISPLAY_DEVICE_ATTACHED_TO_DESKTOP,
    DISP_CHANGE_SUCCESSFUL, DM_BITSPERPEL, DM_DISPLAYFREQUENCY, DM_DISPLAYORIENTATION,
    DM_PELSHEIGHT, DM_PELSWIDTH, ENUM_CURRENT_SETTINGS, ENUM_DISPLAY_SETTINGS_MODE,
};

use crate::display::{DisplayBackend, Mode, Orientation, ScalingMode, DPI_SCALES};
use crate::error::BackendError;

const EDD_GET_DEVICE_INTERFACE_NAME: u32 = 0x1;

// Undocumented device info types for the per-source DPI scale.
const DPI_SCALE_GET: i32 = -3;
const DPI_SCALE_SET: i32 = -4;
/// `ERROR_INVALID_PARAMETER`.
const INVALID_PARAMETER: i32 = 87;

#[repr(C)]
struct DpiScaleGet {
    header: DISPLAYCONFIG_DEVICE_INFO_HEADER,
    min_scale_rel: i32,
    cur_scale_rel: i32,
    max_scale_rel: i32,
}

#[repr(C)]
struct DpiScaleSet {
    header: DISPLAYCONFIG_DEVICE_INFO_HEADER,
    scale_rel: i32,
}

/// A monitor attached to the desktop.
struct Monitor {
    /// Device interface path, used as the display id.
    id: String,
    /// GDI adapter name such as `\\.\DISPLAY1`.
    device_name: Vec<u16>,
}

#[derive(Debug, Default)]
pub struct WindowsDisplayBackend;

impl WindowsDisplayBackend {
    pub fn new() -> Self {
        Self
    }

    fn monitors(&self) -> Vec<Monitor> {
        let mut monitors = Vec::new();
        let mut adapter_index = 0;
        loop {
            let mut adapter = DISPLAY_DEVICEW {
                cb: size_of::<DISPLAY_DEVICEW>() as u32,
                ..Default::default()
            };
            let found =
                unsafe { EnumDisplayDevicesW(PCWSTR::null(), adapter_index, &mut adapter, 0) };
            if !found.as_bool() {
                break;
            }
            adapter_index += 1;
            if !adapter.StateFlags.contains(DISPLAY_DEVICE_ATTACHED_TO_DESKTOP) {
                continue;
            }

            let mut monitor = DISPLAY_DEVICEW {
                cb: size_of::<DISPLAY_DEVICEW>() as u32,
                ..Default::default()
            };
            let has_monitor = unsafe {
                EnumDisplayDevicesW(
                    PCWSTR(adapter.DeviceName.as_ptr()),
                    0,
                    &mut monitor,
                    EDD_GET_DEVICE_INTERFACE_NAME,
                )
            };
            if !has_monitor.as_bool() {
                continue;
            }
            monitors.push(Monitor {
                id: from_wide(&monitor.DeviceID),
                device_name: nul_terminated(&adapter.DeviceName),
            });
        }
        monitors
    }

    fn device_name(&self, id: &str) -> Result<Vec<u16>, BackendError> {
        self.monitors()
            .into_iter()
            .find(|m| m.id.eq_ignore_ascii_case(id))
            .map(|m| m.device_name)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    fn current_settings(&self, id: &str) -> Result<DEVMODEW, BackendError> {
        let name = self.device_name(id)?;
        let mut devmode = empty_devmode();
        let ok =
            unsafe { EnumDisplaySettingsW(PCWSTR(name.as_ptr()), ENUM_CURRENT_SETTINGS, &mut devmode) };
        if !ok.as_bool() {
            return Err(BackendError::Os {
                call: "EnumDisplaySettingsW",
                code: 0,
            });
        }
        Ok(devmode)
    }
}

impl DisplayBackend for WindowsDisplayBackend {
    fn display_ids(&self) -> Vec<String> {
        self.monitors().into_iter().map(|m| m.id).collect()
    }

    fn modes(&self, id: &str) -> Result<Vec<Mode>, BackendError> {
        let name = self.device_name(id)?;
        // The list is reported in current-rotation terms.
        let rotated = orientation_of(&self.current_settings(id)?).is_quarter_turn();
        let mut modes = Vec::new();
        let mut index = 0;
        loop {
            let mut devmode = empty_devmode();
            let ok = unsafe {
                EnumDisplaySettingsW(
                    PCWSTR(name.as_ptr()),
                    ENUM_DISPLAY_SETTINGS_MODE(index),
                    &mut devmode,
                )
            };
            if !ok.as_bool() {
                break;
            }
            index += 1;
            let mode = mode_of(&devmode);
            modes.push(if rotated {
                mode.invert()
            } else {
                mode
            });
        }
        Ok(modes)
    }

    fn current_mode(&self, id: &str) -> Result<Mode, BackendError> {
        let devmode = self.current_settings(id)?;
        let mode = mode_of(&devmode);
        Ok(if orientation_of(&devmode).is_quarter_turn() {
            mode.invert()
        } else {
            mode
        })
    }

    fn current_orientation(&self, id: &str) -> Result<Orientation, BackendError> {
        Ok(orientation_of(&self.current_settings(id)?))
    }

    fn set_mode(
        &self,
        id: &str,
        mode: &Mode,
        orientation: Orientation,
    ) -> Result<(), BackendError> {
        let name = self.device_name(id)?;
        let mut devmode = empty_devmode();
        devmode.dmPelsWidth = mode.width;
        devmode.dmPelsHeight = mode.height;
        devmode.dmBitsPerPel = mode.color_depth;
        devmode.dmDisplayFrequency = mode.refresh_rate;
        devmode.dmFields =
            DM_PELSWIDTH | DM_PELSHEIGHT | DM_BITSPERPEL | DM_DISPLAYFREQUENCY;
        if let Some(index) = orientation.index() {
            devmode.Anonymous1.Anonymous2.dmDisplayOrientation = DEVMODE_DISPLAY_ORIENTATION(index);
            devmode.dmFields |= DM_DISPLAYORIENTATION;
        }

        let result = unsafe {
            ChangeDisplaySettingsExW(
                PCWSTR(name.as_ptr()),
                Some(&devmode as *const DEVMODEW),
                HWND::default(),
                CDS_UPDATEREGISTRY,
                None,
            )
        };
        if result != DISP_CHANGE_SUCCESSFUL {
            return Err(BackendError::Os {
                call: "ChangeDisplaySettingsExW",
                code: result.0,
            });
        }
        Ok(())
    }

    fn set_scale(
        &self,
        id: &str,
        scaling_mode: ScalingMode,
        dpi_scale: u32,
    ) -> Result<(), BackendError> {
        let (mut paths, modes) = query_active_paths()?;
        let index = path_index(&paths, id).ok_or_else(|| BackendError::NotFound(id.to_string()))?;

        let scaling = match scaling_mode {
            ScalingMode::PreserveAspectRatio => DISPLAYCONFIG_SCALING_ASPECTRATIOCENTEREDMAX,
            ScalingMode::Stretched => DISPLAYCONFIG_SCALING_STRETCHED,
            ScalingMode::Centered => DISPLAYCONFIG_SCALING_CENTERED,
        };
        if paths[index].targetInfo.scaling != scaling {
            paths[index].targetInfo.scaling = scaling;
            apply_paths(&paths, &modes)?;
        }

        let source = &paths[index].sourceInfo;
        set_dpi_scale(source.adapterId, source.id, dpi_scale)
    }
}

fn empty_devmode() -> DEVMODEW {
    DEVMODEW {
        dmSize: size_of::<DEVMODEW>() as u16,
        ..Default::default()
    }
}

fn mode_of(devmode: &DEVMODEW) -> Mode {
    Mode::new(
        devmode.dmPelsWidth,
        devmode.dmPelsHeight,
        devmode.dmDisplayFrequency,
        devmode.dmBitsPerPel,
    )
}

fn orientation_of(devmode: &DEVMODEW) -> Orientation {
    let raw = unsafe { devmode.Anonymous1.Anonymous2.dmDisplayOrientation };
    Orientation::from_index(raw.0).unwrap_or(Orientation::Normal)
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

fn nul_terminated(buf: &[u16]) -> Vec<u16> {
    let len = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    let mut out = buf[..len].to_vec();
    out.push(0);
    out
}

fn query_active_paths(
) -> Result<(Vec<DISPLAYCONFIG_PATH_INFO>, Vec<DISPLAYCONFIG_MODE_INFO>), BackendError> {
    let mut path_count = 0u32;
    let mut mode_count = 0u32;
    let status = unsafe {
        GetDisplayConfigBufferSizes(QDC_ONLY_ACTIVE_PATHS, &mut path_count, &mut mode_count)
    };
    if status != ERROR_SUCCESS {
        return Err(BackendError::Os {
            call: "GetDisplayConfigBufferSizes",
            code: status.0 as i32,
        });
    }

    let mut paths = vec![DISPLAYCONFIG_PATH_INFO::default(); path_count as usize];
    let mut modes = vec![DISPLAYCONFIG_MODE_INFO::default(); mode_count as usize];
    let status = unsafe {
        QueryDisplayConfig(
            QDC_ONLY_ACTIVE_PATHS,
            &mut path_count,
            paths.as_mut_ptr(),
            &mut mode_count,
            modes.as_mut_ptr(),
            None,
        )
    };
    if status != ERROR_SUCCESS {
        return Err(BackendError::Os {
            call: "QueryDisplayConfig",
            code: status.0 as i32,
        });
    }
    paths.truncate(path_count as usize);
    modes.truncate(mode_count as usize);
    Ok((paths, modes))
}

fn apply_paths(
    paths: &[DISPLAYCONFIG_PATH_INFO],
    modes: &[DISPLAYCONFIG_MODE_INFO],
) -> Result<(), BackendError> {
    let status = unsafe {
        SetDisplayConfig(
            Some(paths),
            Some(modes),
            SDC_APPLY | SDC_USE_SUPPLIED_DISPLAY_CONFIG | SDC_SAVE_TO_DATABASE,
        )
    };
    if status != 0 {
        return Err(BackendError::Os {
            call: "SetDisplayConfig",
            code: status,
        });
    }
    Ok(())
}

/// Find the active path whose target monitor has the given interface path.
fn path_index(paths: &[DISPLAYCONFIG_PATH_INFO], id: &str) -> Option<usize> {
    paths.iter().position(|path| {
        let mut name = DISPLAYCONFIG_TARGET_DEVICE_NAME::default();
        name.header = DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_GET_TARGET_NAME,
            size: size_of::<DISPLAYCONFIG_TARGET_DEVICE_NAME>() as u32,
            adapterId: path.targetInfo.adapterId,
            id: path.targetInfo.id,
        };
        let status = unsafe { DisplayConfigGetDeviceInfo(&mut name.header) };
        status == 0 && from_wide(&name.monitorDevicePath).eq_ignore_ascii_case(id)
    })
}

/// Offset of `target` (an index into `DPI_SCALES`) from the recommended
/// scale, whose index is `|min_rel|`. `None` when the display cannot reach it.
fn relative_scale_index(target: i32, min_rel: i32, max_rel: i32) -> Option<i32> {
    let relative = target - min_rel.abs();
    (min_rel..=max_rel).contains(&relative).then_some(relative)
}

/// The OS addresses DPI relative to the recommended scale of the source, so
/// the target percentage is turned into an offset from that index.
fn set_dpi_scale(adapter: LUID, source_id: u32, dpi_scale: u32) -> Result<(), BackendError> {
    let target = DPI_SCALES
        .iter()
        .position(|s| *s == dpi_scale)
        .ok_or(BackendError::Os {
            call: "DisplayConfigSetDeviceInfo",
            code: INVALID_PARAMETER,
        })? as i32;

    let mut get = DpiScaleGet {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_TYPE(DPI_SCALE_GET),
            size: size_of::<DpiScaleGet>() as u32,
            adapterId: adapter,
            id: source_id,
        },
        min_scale_rel: 0,
        cur_scale_rel: 0,
        max_scale_rel: 0,
    };
    let status = unsafe { DisplayConfigGetDeviceInfo(&mut get.header) };
    if status != 0 {
        return Err(BackendError::Os {
            call: "DisplayConfigGetDeviceInfo",
            code: status,
        });
    }

    let relative = relative_scale_index(target, get.min_scale_rel, get.max_scale_rel)
        .ok_or(BackendError::Os {
            call: "DisplayConfigSetDeviceInfo",
            code: INVALID_PARAMETER,
        })?;
    if relative == get.cur_scale_rel {
        return Ok(());
    }

    let set = DpiScaleSet {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_TYPE(DPI_SCALE_SET),
            size: size_of::<DpiScaleSet>() as u32,
            adapterId: adapter,
            id: source_id,
        },
        scale_rel: relative,
    };
    let status = unsafe { DisplayConfigSetDeviceInfo(&set.header) };
    if status != 0 {
        return Err(BackendError::Os {
            call: "DisplayConfigSetDeviceInfo",
            code: status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachable_scale_maps_to_offset_from_recommended() {
        // recommended 150 % (index 2), range 100 %..=250 %
        assert_eq!(relative_scale_index(2, -2, 3), Some(0));
        assert_eq!(relative_scale_index(0, -2, 3), Some(-2));
        assert_eq!(relative_scale_index(5, -2, 3), Some(3));
    }

    #[test]
    fn unreachable_scale_is_rejected() {
        assert_eq!(relative_scale_index(8, -2, 2), None);
        assert_eq!(relative_scale_index(0, 0, 4), Some(0));
        assert_eq!(relative_scale_index(6, 0, 4), None);
    }
}
