//! Host import catalog and registry.
//!
//! The catalog is the fixed list of entry points the device runtime
//! provides under the `env` module. Each compilation keeps an
//! [`ImportRegistry`] recording which of them the program actually calls;
//! the assembler writes only those, compacted in catalog order.
//!
//! The catalog mirrors the runtime's whole ABI, including entry points no
//! statement calls yet (`led_set_buffer`, `led_shift`, `print_str`). They
//! cost nothing: an entry is imported only once some code marks it.

use std::collections::BTreeSet;
use wasm_encoder::ValType;

/// Immutable catalog entry: name and signature of one host function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportDescriptor {
    /// Field name under the `env` module.
    pub name: &'static str,
    /// Parameter types.
    pub params: &'static [ValType],
    /// Result types (empty or one).
    pub results: &'static [ValType],
}

macro_rules! val {
    (I) => {
        ValType::I32
    };
    (F) => {
        ValType::F32
    };
}

macro_rules! host_catalog {
    ($( $variant:ident => $name:literal ( $($param:ident),* ) $(-> $result:ident)? ; )*) => {
        /// A host entry point, in catalog order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum HostFn {
            $(
                #[doc = concat!("`env.", $name, "`")]
                $variant,
            )*
        }

        /// Signatures, indexed by `HostFn as usize`.
        static CATALOG: &[ImportDescriptor] = &[
            $(
                ImportDescriptor {
                    name: $name,
                    params: &[$(val!($param)),*],
                    results: &[$(val!($result))?],
                },
            )*
        ];

        impl HostFn {
            /// Every entry point, in catalog order.
            pub const ALL: &'static [HostFn] = &[$(HostFn::$variant),*];
        }
    };
}

host_catalog! {
    // Timing and parameters
    DelayMs => "delay_ms"(I);
    Millis => "millis"() -> I;
    GetParam => "get_param"(I) -> I;
    SetParam => "set_param"(I, I);
    ShouldStop => "should_stop"() -> I;
    // LEDs and colour
    LedSetPixel => "led_set_pixel"(I, I, I, I, I);
    LedFill => "led_fill"(I, I, I, I);
    LedShow => "led_show"();
    LedCount => "led_count"(I) -> I;
    LedGamma8 => "led_gamma8"(I) -> I;
    LedSetGamma => "led_set_gamma"(I);
    // Not called by any statement
    LedSetBuffer => "led_set_buffer"(I, I, I);
    LedShift => "led_shift"(I, I, I, I, I);
    LedRotate => "led_rotate"(I, I);
    LedReverse => "led_reverse"(I);
    LedSetPixelHsv => "led_set_pixel_hsv"(I, I, I, I, I);
    LedFillHsv => "led_fill_hsv"(I, I, I, I);
    HsvToRgb => "hsv_to_rgb"(I, I, I) -> I;
    RgbToHsv => "rgb_to_hsv"(I, I, I) -> I;
    // Output
    HostPrintf => "host_printf"(I, I) -> I;
    PrintI32 => "print_i32"(I);
    PrintF32 => "print_f32"(F);
    // Not called by any statement; strings print through host_printf
    PrintStr => "print_str"(I, I);
    // Location
    GpsValid => "gps_valid"() -> I;
    HasOrigin => "has_origin"() -> I;
    OriginDist => "origin_dist"() -> F;
    OriginBearing => "origin_bearing"() -> F;
    GetLat => "get_lat"() -> F;
    GetLon => "get_lon"() -> F;
    GetAlt => "get_alt"() -> F;
    GetSpeed => "get_speed"() -> F;
    GetDir => "get_dir"() -> F;
    // Clock
    GetSecond => "get_second"() -> I;
    GetMinute => "get_minute"() -> I;
    GetHour => "get_hour"() -> I;
    GetDay => "get_day"() -> I;
    GetMonth => "get_month"() -> I;
    GetYear => "get_year"() -> I;
    GetDayOfWeek => "get_day_of_week"() -> I;
    GetDayOfYear => "get_day_of_year"() -> I;
    GetIsLeapYear => "get_is_leap_year"() -> I;
    TimeValid => "time_valid"() -> I;
    // Orientation and environment
    ImuValid => "imu_valid"() -> I;
    GetPitch => "get_pitch"() -> F;
    GetRoll => "get_roll"() -> F;
    GetYaw => "get_yaw"() -> F;
    GetAccX => "get_acc_x"() -> F;
    GetAccY => "get_acc_y"() -> F;
    GetAccZ => "get_acc_z"() -> F;
    GetTemp => "get_temp"() -> F;
    GetHumidity => "get_humidity"() -> F;
    GetBrightness => "get_brightness"() -> F;
    // Randomness and math
    RandomInt => "random_int"(I, I) -> I;
    Sinf => "sinf"(F) -> F;
    Cosf => "cosf"(F) -> F;
    Atan2f => "atan2f"(F, F) -> F;
    Powf => "powf"(F, F) -> F;
    // Lookup table
    LutLoad => "lut_load"(I) -> I;
    LutSave => "lut_save"(I) -> I;
    LutCheck => "lut_check"(I) -> I;
    LutGet => "lut_get"(I) -> I;
    LutSet => "lut_set"(I, I);
    LutSize => "lut_size"() -> I;
    // Synchronization
    WaitPps => "wait_pps"(I) -> I;
    WaitParam => "wait_param"(I, I, I, I) -> I;
    CuePlaying => "cue_playing"() -> I;
    CueElapsed => "cue_elapsed"() -> I;
    // Power and sun
    GetBatVoltage => "get_bat_voltage"() -> F;
    GetSolarVoltage => "get_solar_voltage"() -> F;
    GetSunrise => "get_sunrise"() -> I;
    GetSunset => "get_sunset"() -> I;
    SunValid => "sun_valid"() -> I;
    IsDaylight => "is_daylight"() -> I;
    // Pins and presence
    PinSet => "pin_set"(I);
    PinClear => "pin_clear"(I);
    PinRead => "pin_read"(I) -> I;
    AnalogRead => "analog_read"(I) -> I;
    GpsPresent => "gps_present"() -> I;
    ImuPresent => "imu_present"() -> I;
    GetBatteryPercentage => "get_battery_percentage"() -> F;
    GetBatteryRuntime => "get_battery_runtime"() -> F;
    GetSunAzimuth => "get_sun_azimuth"() -> F;
    GetSunElevation => "get_sun_elevation"() -> F;
    // Strings
    StrAlloc => "basic_str_alloc"(I) -> I;
    StrFree => "basic_str_free"(I);
    StrLen => "basic_str_len"(I) -> I;
    StrCopy => "basic_str_copy"(I) -> I;
    StrConcat => "basic_str_concat"(I, I) -> I;
    StrCmp => "basic_str_cmp"(I, I) -> I;
    StrMid => "basic_str_mid"(I, I, I) -> I;
    StrLeft => "basic_str_left"(I, I) -> I;
    StrRight => "basic_str_right"(I, I) -> I;
    StrChr => "basic_str_chr"(I) -> I;
    StrAsc => "basic_str_asc"(I) -> I;
    StrFromInt => "basic_str_from_int"(I) -> I;
    StrFromFloat => "basic_str_from_float"(F) -> I;
    StrToInt => "basic_str_to_int"(I) -> I;
    StrToFloat => "basic_str_to_float"(I) -> F;
    StrUpper => "basic_str_upper"(I) -> I;
    StrLower => "basic_str_lower"(I) -> I;
    StrInstr => "basic_str_instr"(I, I, I) -> I;
    StrTrim => "basic_str_trim"(I) -> I;
    // More math
    Tanf => "tanf"(F) -> F;
    Expf => "expf"(F) -> F;
    Logf => "logf"(F) -> F;
    Log2f => "log2f"(F) -> F;
    Fmodf => "fmodf"(F, F) -> F;
    // More strings
    StrRepeat => "basic_str_repeat"(I, I) -> I;
    StrSpace => "basic_str_space"(I) -> I;
    StrHex => "basic_str_hex"(I) -> I;
    StrOct => "basic_str_oct"(I) -> I;
    StrMidAssign => "basic_str_mid_assign"(I, I, I, I) -> I;
    StrLtrim => "basic_str_ltrim"(I) -> I;
    StrRtrim => "basic_str_rtrim"(I) -> I;
    // Files
    FileOpen => "basic_file_open"(I, I) -> I;
    FileClose => "basic_file_close"(I);
    FilePrint => "basic_file_print"(I, I) -> I;
    FileReadln => "basic_file_readln"(I) -> I;
    FileEof => "basic_file_eof"(I) -> I;
    FileDelete => "file_delete"(I, I) -> I;
    FileRename => "file_rename"(I, I, I, I) -> I;
    FileMkdir => "file_mkdir"(I, I) -> I;
    FileRmdir => "file_rmdir"(I, I) -> I;
}

impl HostFn {
    /// Name and signature of this entry point.
    pub fn descriptor(self) -> &'static ImportDescriptor {
        &CATALOG[self as usize]
    }

    /// Field name under the `env` module.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Result type, if the function returns a value.
    pub fn result(self) -> Option<ValType> {
        self.descriptor().results.first().copied()
    }

    /// Finds an entry point by its field name.
    pub fn by_name(name: &str) -> Option<HostFn> {
        HostFn::ALL.iter().copied().find(|f| f.name() == name)
    }
}

/// The set of host functions referenced by one program.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportRegistry {
    used: BTreeSet<HostFn>,
}

impl ImportRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reference to `host`.
    pub fn mark(&mut self, host: HostFn) {
        self.used.insert(host);
    }

    /// True if `host` has been referenced.
    pub fn is_used(&self, host: HostFn) -> bool {
        self.used.contains(&host)
    }

    /// Referenced functions in catalog order.
    pub fn used(&self) -> impl Iterator<Item = HostFn> + '_ {
        self.used.iter().copied()
    }

    /// Number of referenced functions.
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// True if nothing is referenced.
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Compacted import index of each catalog entry, `None` when unused.
    pub fn compacted_indices(&self) -> Vec<Option<u32>> {
        let mut table = vec![None; HostFn::ALL.len()];
        for (index, host) in self.used().enumerate() {
            table[host as usize] = Some(index as u32);
        }
        table
    }
}
