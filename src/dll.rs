//! Vendor J2534 DLL backend: implements the Pass-Thru traits over a
//! dynamically loaded PassThru library, so the ISO-TP shim can sit on top of
//! any installed vehicle interface.

use std::ffi::{c_void, CString};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{J2534Error, Result};
use crate::passthru::{DeviceVersion, PassThruChannel, PassThruDevice, PassThruLibrary};
use crate::types::{PassThruMsg, SConfig, GET_CONFIG, SET_CONFIG};

/// SCONFIG_LIST structure for GET_CONFIG / SET_CONFIG ioctls
#[repr(C)]
struct SConfigList {
    num_of_params: u32,
    config_ptr: *const SConfig,
}

// Type aliases for J2534 DLL function pointers
type PassThruOpenFn = unsafe extern "system" fn(*const c_void, *mut u32) -> u32;
type PassThruCloseFn = unsafe extern "system" fn(u32) -> u32;
type PassThruConnectFn = unsafe extern "system" fn(u32, u32, u32, u32, *mut u32) -> u32;
type PassThruDisconnectFn = unsafe extern "system" fn(u32) -> u32;
type PassThruReadMsgsFn = unsafe extern "system" fn(u32, *mut PassThruMsg, *mut u32, u32) -> u32;
type PassThruWriteMsgsFn = unsafe extern "system" fn(u32, *const PassThruMsg, *mut u32, u32) -> u32;
type PassThruStartPeriodicMsgFn =
    unsafe extern "system" fn(u32, *const PassThruMsg, *mut u32, u32) -> u32;
type PassThruStopPeriodicMsgFn = unsafe extern "system" fn(u32, u32) -> u32;
type PassThruStartMsgFilterFn = unsafe extern "system" fn(
    u32,
    u32,
    *const PassThruMsg,
    *const PassThruMsg,
    *const PassThruMsg,
    *mut u32,
) -> u32;
type PassThruStopMsgFilterFn = unsafe extern "system" fn(u32, u32) -> u32;
type PassThruSetProgrammingVoltageFn = unsafe extern "system" fn(u32, u32, u32) -> u32;
type PassThruIoctlFn = unsafe extern "system" fn(u32, u32, *const c_void, *mut c_void) -> u32;
type PassThruReadVersionFn = unsafe extern "system" fn(u32, *mut u8, *mut u8, *mut u8) -> u32;
type PassThruGetLastErrorFn = unsafe extern "system" fn(*mut u8) -> u32;

/// Holds a dynamically loaded J2534 DLL and its function pointers
#[derive(Debug)]
pub struct J2534Api {
    _lib: libloading::Library,
    pass_thru_open: PassThruOpenFn,
    pass_thru_close: PassThruCloseFn,
    pass_thru_connect: PassThruConnectFn,
    pass_thru_disconnect: PassThruDisconnectFn,
    pass_thru_read_msgs: PassThruReadMsgsFn,
    pass_thru_write_msgs: PassThruWriteMsgsFn,
    pass_thru_start_periodic_msg: PassThruStartPeriodicMsgFn,
    pass_thru_stop_periodic_msg: PassThruStopPeriodicMsgFn,
    pass_thru_start_msg_filter: PassThruStartMsgFilterFn,
    pass_thru_stop_msg_filter: PassThruStopMsgFilterFn,
    pass_thru_set_programming_voltage: PassThruSetProgrammingVoltageFn,
    pass_thru_ioctl: PassThruIoctlFn,
    pass_thru_read_version: PassThruReadVersionFn,
    pass_thru_get_last_error: PassThruGetLastErrorFn,
}

macro_rules! resolve {
    ($lib:expr, $name:literal) => {
        *$lib.get(concat!($name, "\0").as_bytes()).map_err(|e| {
            log::error!("{} not found in J2534 DLL: {}", $name, e);
            J2534Error::Failed
        })?
    };
}

impl J2534Api {
    /// Load a J2534 DLL and resolve all PassThru entry points
    pub fn load(dll_path: &str) -> Result<Self> {
        unsafe {
            let lib = libloading::Library::new(dll_path).map_err(|e| {
                log::error!("failed to load J2534 DLL '{}': {}", dll_path, e);
                J2534Error::Failed
            })?;

            Ok(Self {
                pass_thru_open: resolve!(lib, "PassThruOpen"),
                pass_thru_close: resolve!(lib, "PassThruClose"),
                pass_thru_connect: resolve!(lib, "PassThruConnect"),
                pass_thru_disconnect: resolve!(lib, "PassThruDisconnect"),
                pass_thru_read_msgs: resolve!(lib, "PassThruReadMsgs"),
                pass_thru_write_msgs: resolve!(lib, "PassThruWriteMsgs"),
                pass_thru_start_periodic_msg: resolve!(lib, "PassThruStartPeriodicMsg"),
                pass_thru_stop_periodic_msg: resolve!(lib, "PassThruStopPeriodicMsg"),
                pass_thru_start_msg_filter: resolve!(lib, "PassThruStartMsgFilter"),
                pass_thru_stop_msg_filter: resolve!(lib, "PassThruStopMsgFilter"),
                pass_thru_set_programming_voltage: resolve!(lib, "PassThruSetProgrammingVoltage"),
                pass_thru_ioctl: resolve!(lib, "PassThruIoctl"),
                pass_thru_read_version: resolve!(lib, "PassThruReadVersion"),
                pass_thru_get_last_error: resolve!(lib, "PassThruGetLastError"),
                _lib: lib,
            })
        }
    }
}

fn check(ret: u32) -> Result<()> {
    if ret != 0 {
        return Err(J2534Error::from_code(ret));
    }
    Ok(())
}

fn trim_nul(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

/// A loaded vendor library
#[derive(Debug)]
pub struct DllLibrary {
    api: Arc<J2534Api>,
}

impl DllLibrary {
    pub fn load(dll_path: &str) -> Result<Self> {
        Ok(Self {
            api: Arc::new(J2534Api::load(dll_path)?),
        })
    }
}

impl PassThruLibrary for DllLibrary {
    type Device = DllDevice;

    fn open(&mut self, name: Option<&str>) -> Result<Self::Device> {
        let name = match name {
            Some(n) => Some(CString::new(n).map_err(|_| J2534Error::NullParameter)?),
            None => None,
        };
        let name_ptr = name
            .as_ref()
            .map(|n| n.as_ptr() as *const c_void)
            .unwrap_or(std::ptr::null());

        let mut device_id = 0u32;
        check(unsafe { (self.api.pass_thru_open)(name_ptr, &mut device_id) })?;
        Ok(DllDevice {
            api: self.api.clone(),
            device_id,
        })
    }

    fn get_last_error(&mut self) -> Result<String> {
        let mut buf = [0u8; 80];
        check(unsafe { (self.api.pass_thru_get_last_error)(buf.as_mut_ptr()) })?;
        Ok(trim_nul(&buf))
    }
}

/// An opened device (PassThruOpen handle); closed on drop
pub struct DllDevice {
    api: Arc<J2534Api>,
    device_id: u32,
}

impl DllDevice {
    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl PassThruDevice for DllDevice {
    type Channel = DllChannel;

    fn connect(&mut self, protocol_id: u32, flags: u32, baud_rate: u32) -> Result<Self::Channel> {
        let mut channel_id = 0u32;
        check(unsafe {
            (self.api.pass_thru_connect)(self.device_id, protocol_id, flags, baud_rate, &mut channel_id)
        })?;
        Ok(DllChannel {
            api: self.api.clone(),
            channel_id,
        })
    }

    fn read_version(&mut self) -> Result<DeviceVersion> {
        let mut firmware = [0u8; 80];
        let mut dll = [0u8; 80];
        let mut api = [0u8; 80];
        check(unsafe {
            (self.api.pass_thru_read_version)(
                self.device_id,
                firmware.as_mut_ptr(),
                dll.as_mut_ptr(),
                api.as_mut_ptr(),
            )
        })?;
        Ok(DeviceVersion {
            firmware: trim_nul(&firmware),
            dll: trim_nul(&dll),
            api: trim_nul(&api),
        })
    }

    fn set_programming_voltage(&mut self, pin_number: u32, voltage: u32) -> Result<()> {
        check(unsafe {
            (self.api.pass_thru_set_programming_voltage)(self.device_id, pin_number, voltage)
        })
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut [u8]) -> Result<()> {
        let input_ptr = if input.is_empty() {
            std::ptr::null()
        } else {
            input.as_ptr() as *const c_void
        };
        let output_ptr = if output.is_empty() {
            std::ptr::null_mut()
        } else {
            output.as_mut_ptr() as *mut c_void
        };
        check(unsafe { (self.api.pass_thru_ioctl)(self.device_id, ioctl_id, input_ptr, output_ptr) })
    }
}

impl Drop for DllDevice {
    fn drop(&mut self) {
        unsafe {
            (self.api.pass_thru_close)(self.device_id);
        }
    }
}

/// A connected channel (PassThruConnect handle); disconnected on drop
pub struct DllChannel {
    api: Arc<J2534Api>,
    channel_id: u32,
}

impl DllChannel {
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }
}

impl PassThruChannel for DllChannel {
    fn read_msgs(
        &mut self,
        msgs: &mut [PassThruMsg],
        num_msgs: &mut u32,
        timeout_ms: u32,
    ) -> Result<()> {
        *num_msgs = (*num_msgs).min(msgs.len() as u32);
        let ret = unsafe {
            (self.api.pass_thru_read_msgs)(self.channel_id, msgs.as_mut_ptr(), num_msgs, timeout_ms)
        };
        // A timeout or empty buffer is not fatal: num_msgs already carries
        // the count actually read
        if ret == J2534Error::Timeout.code() || ret == J2534Error::BufferEmpty.code() {
            return Ok(());
        }
        check(ret)
    }

    fn write_msgs(
        &mut self,
        msgs: &[PassThruMsg],
        num_msgs: &mut u32,
        timeout_ms: u32,
    ) -> Result<()> {
        *num_msgs = (*num_msgs).min(msgs.len() as u32);
        check(unsafe {
            (self.api.pass_thru_write_msgs)(self.channel_id, msgs.as_ptr(), num_msgs, timeout_ms)
        })
    }

    fn start_msg_filter(
        &mut self,
        filter_type: u32,
        mask: Option<&PassThruMsg>,
        pattern: Option<&PassThruMsg>,
        flow_control: Option<&PassThruMsg>,
    ) -> Result<u32> {
        let as_ptr = |msg: Option<&PassThruMsg>| {
            msg.map(|m| m as *const PassThruMsg).unwrap_or(std::ptr::null())
        };
        let mut filter_id = 0u32;
        check(unsafe {
            (self.api.pass_thru_start_msg_filter)(
                self.channel_id,
                filter_type,
                as_ptr(mask),
                as_ptr(pattern),
                as_ptr(flow_control),
                &mut filter_id,
            )
        })?;
        Ok(filter_id)
    }

    fn stop_msg_filter(&mut self, filter_id: u32) -> Result<()> {
        check(unsafe { (self.api.pass_thru_stop_msg_filter)(self.channel_id, filter_id) })
    }

    fn start_periodic_msg(&mut self, msg: &PassThruMsg, interval_ms: u32) -> Result<u32> {
        let mut msg_id = 0u32;
        check(unsafe {
            (self.api.pass_thru_start_periodic_msg)(self.channel_id, msg, &mut msg_id, interval_ms)
        })?;
        Ok(msg_id)
    }

    fn stop_periodic_msg(&mut self, msg_id: u32) -> Result<()> {
        check(unsafe { (self.api.pass_thru_stop_periodic_msg)(self.channel_id, msg_id) })
    }

    fn get_config(&mut self, configs: &mut [SConfig]) -> Result<()> {
        let list = SConfigList {
            num_of_params: configs.len() as u32,
            config_ptr: configs.as_ptr(),
        };
        check(unsafe {
            (self.api.pass_thru_ioctl)(
                self.channel_id,
                GET_CONFIG,
                &list as *const SConfigList as *const c_void,
                std::ptr::null_mut(),
            )
        })
    }

    fn set_config(&mut self, configs: &[SConfig]) -> Result<()> {
        let list = SConfigList {
            num_of_params: configs.len() as u32,
            config_ptr: configs.as_ptr(),
        };
        check(unsafe {
            (self.api.pass_thru_ioctl)(
                self.channel_id,
                SET_CONFIG,
                &list as *const SConfigList as *const c_void,
                std::ptr::null_mut(),
            )
        })
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut [u8]) -> Result<()> {
        let input_ptr = if input.is_empty() {
            std::ptr::null()
        } else {
            input.as_ptr() as *const c_void
        };
        let output_ptr = if output.is_empty() {
            std::ptr::null_mut()
        } else {
            output.as_mut_ptr() as *mut c_void
        };
        check(unsafe { (self.api.pass_thru_ioctl)(self.channel_id, ioctl_id, input_ptr, output_ptr) })
    }
}

impl Drop for DllChannel {
    fn drop(&mut self) {
        unsafe {
            (self.api.pass_thru_disconnect)(self.channel_id);
        }
    }
}

/// Discover installed J2534 libraries from the Windows registry.
/// Searches both native and WOW6432Node views to catch all devices.
#[cfg(target_os = "windows")]
pub fn discover_j2534_dlls() -> Vec<(String, PathBuf)> {
    use winreg::enums::*;
    use winreg::RegKey;

    let mut results = Vec::new();
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);

    let registry_paths = [
        (r"SOFTWARE\PassThruSupport.04.04", KEY_READ | KEY_WOW64_64KEY),
        (r"SOFTWARE\PassThruSupport.04.04", KEY_READ | KEY_WOW64_32KEY),
    ];

    let mut seen_dlls = std::collections::HashSet::new();

    for (path, flags) in &registry_paths {
        if let Ok(key) = hklm.open_subkey_with_flags(path, *flags) {
            for name in key.enum_keys().filter_map(|k| k.ok()) {
                if let Ok(subkey) = key.open_subkey_with_flags(&name, KEY_READ) {
                    if let Ok(dll_path) = subkey.get_value::<String, _>("FunctionLibrary") {
                        // Deduplicate by DLL path (case-insensitive)
                        let dll_lower = dll_path.to_lowercase();
                        if seen_dlls.contains(&dll_lower) {
                            continue;
                        }
                        seen_dlls.insert(dll_lower);

                        let device_name = subkey
                            .get_value::<String, _>("Name")
                            .unwrap_or_else(|_| name.clone());
                        results.push((device_name, PathBuf::from(dll_path)));
                    }
                }
            }
        }
    }

    results
}

#[cfg(not(target_os = "windows"))]
pub fn discover_j2534_dlls() -> Vec<(String, PathBuf)> {
    // Off Windows there is no PassThruSupport registry; callers supply a path
    Vec::new()
}
