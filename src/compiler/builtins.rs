//! Built-in functions.
//!
//! A built-in is recognised when a name is followed by `(`. Most of them are
//! a thin wrapper around one host import; [`lookup_builtin`] describes each
//! one as data (argument conversions, import, result handling) and the
//! compiler emits the same shape of code for all of them. The rest have
//! dedicated instruction sequences ([`Custom`]).

use crate::codegen::{ELEMENT_SIZE, FILE_CHANNELS, FILE_TABLE_BASE, Instr};
use crate::compiler::error::ErrorKind;
use crate::compiler::imports::HostFn;
use crate::compiler::symbols::Kind;
use crate::compiler::{CompileResult, Compiler};
use crate::lexer::{Token, TokenKind};
use wasm_encoder::ValType;

/// How an argument is converted before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// Coerced to integer.
    Int,
    /// Coerced to float.
    Float,
    /// Must be a string.
    Str,
    /// Any numeric kind, left as is.
    Num,
}

impl Arg {
    /// Conversion that matches a variable kind.
    pub fn of(kind: Kind) -> Arg {
        match kind {
            Kind::Int => Arg::Int,
            Kind::Float => Arg::Float,
            Kind::Str => Arg::Str,
        }
    }
}

/// What happens to a host call's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ret {
    Int,
    Float,
    /// An i32 string handle.
    Str,
    /// Float result truncated to integer.
    Truncate,
    /// No result; the expression value is 0.
    Unit,
}

impl Ret {
    /// Kind of the expression after result handling.
    pub fn kind(self) -> Kind {
        match self {
            Ret::Float => Kind::Float,
            Ret::Str => Kind::Str,
            Ret::Int | Ret::Truncate | Ret::Unit => Kind::Int,
        }
    }
}

/// Built-ins with a dedicated code sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Custom {
    Abs,
    Sgn,
    Int,
    Float,
    Limit,
    Limit256,
    Scale,
    Sin256,
    Dist,
    Angle,
    Temp,
    Timestamp,
    Version,
    LastComm,
    SetLedCol,
    SetLedRgb,
    SetArray,
    GetMaxLed,
    WaitFor,
    Str,
    Instr,
    Lbound,
    Eof,
}

impl Custom {
    /// Argument conversions, and how many of them are required.
    fn args(self) -> (&'static [Arg], usize) {
        let args: &'static [Arg] = match self {
            Custom::Abs | Custom::Sgn | Custom::Str => NUM1,
            Custom::Int => F1,
            Custom::Float | Custom::Limit256 | Custom::Sin256 | Custom::Timestamp => I1,
            Custom::Limit | Custom::SetLedCol | Custom::SetLedRgb => I3,
            Custom::Scale | Custom::WaitFor => I5,
            Custom::Dist | Custom::Angle | Custom::SetArray => I4,
            Custom::Instr => &[Arg::Str, Arg::Str, Arg::Int],
            Custom::Temp
            | Custom::Version
            | Custom::LastComm
            | Custom::GetMaxLed
            | Custom::Lbound
            | Custom::Eof => NONE,
        };
        let required = match self {
            Custom::Instr => 2,
            _ => args.len(),
        };
        (args, required)
    }
}

/// One built-in function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Builtin {
    /// Convert arguments, call one import, adapt the result.
    Host {
        host: HostFn,
        args: &'static [Arg],
        ret: Ret,
    },
    /// One float argument and one inline instruction.
    Inline(Instr),
    /// Arguments are evaluated and discarded; the value is 0.
    Ignored(usize),
    /// Dedicated code.
    Custom(Custom),
}

impl Builtin {
    /// Accepted argument counts, as `(min, max)`.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Builtin::Host { args, .. } => (args.len(), args.len()),
            Builtin::Inline(_) => (1, 1),
            Builtin::Ignored(n) => (*n, *n),
            Builtin::Custom(Custom::Lbound) => (1, 2),
            Builtin::Custom(Custom::Eof) => (1, 1),
            Builtin::Custom(custom) => {
                let (args, required) = custom.args();
                (required, args.len())
            }
        }
    }

    /// One-line description for hover text.
    pub fn describe(&self) -> String {
        match self {
            Builtin::Host { host, ret, .. } => {
                let (min, _) = self.arity();
                format!(
                    "built-in, {min} argument(s), returns {}; calls env.{}",
                    ret.kind(),
                    host.name()
                )
            }
            Builtin::Inline(_) => "built-in float math, compiled inline".to_string(),
            Builtin::Ignored(n) => format!("array helper, {n} argument(s), evaluates to 0"),
            Builtin::Custom(custom) => format!("built-in ({custom:?}), compiled inline"),
        }
    }
}

const NONE: &[Arg] = &[];
const I1: &[Arg] = &[Arg::Int];
const I2: &[Arg] = &[Arg::Int, Arg::Int];
const I3: &[Arg] = &[Arg::Int, Arg::Int, Arg::Int];
const I4: &[Arg] = &[Arg::Int, Arg::Int, Arg::Int, Arg::Int];
const I5: &[Arg] = &[Arg::Int, Arg::Int, Arg::Int, Arg::Int, Arg::Int];
const F1: &[Arg] = &[Arg::Float];
const F2: &[Arg] = &[Arg::Float, Arg::Float];
const S1: &[Arg] = &[Arg::Str];
const NUM1: &[Arg] = &[Arg::Num];

const fn host(host: HostFn, args: &'static [Arg], ret: Ret) -> Builtin {
    Builtin::Host { host, args, ret }
}

/// Every recognised built-in name.
pub const BUILTIN_NAMES: &[&str] = &[
    "GETPARAM", "SETPARAM", "SHOULDSTOP", "HASGPS", "HASORIGIN", "SECOND", "MINUTE", "HOUR",
    "DAY", "MONTH", "YEAR", "DAYOFWEEK", "DAYOFYEAR", "ISLEAPYEAR", "HASDATE", "HASTIME",
    "HASGYRO", "HASACC", "HASMAG", "ORIGINDIST", "ORIGINANGLE", "GPSSPEED", "GPSDIR", "GPSALT",
    "PITCH", "ROLL", "YAW", "ACCX", "ACCY", "ACCZ", "HUM", "BRIGHT", "BATPCT", "BATRUNTIME",
    "SUNAZ", "SUNEL", "ORIGINDIST#", "ORIGINANGLE#", "GPSSPEED#", "GPSDIR#", "GPSALT#",
    "GPSLAT#", "GPSLON#", "PITCH#", "ROLL#", "YAW#", "ACCX#", "ACCY#", "ACCZ#", "TEMP#", "HUM#",
    "BRIGHT#", "BATPCT#", "BATRUNTIME#", "SUNAZ#", "SUNEL#", "BATVOLT#", "SOLARVOLT#", "GAMMA256",
    "LOADLUT", "SAVELUT", "LUTSIZE", "LUT", "LUTSET", "LUTCOUNT", "PIN_READ", "ANALOG_READ",
    "PIN_SET", "PIN_CLEAR", "GPSPRESENT", "IMUPRESENT", "UPTIME", "CUEPLAYING", "CUEELAPSED",
    "SUNRISE", "SUNSET", "HASSUN", "ISDAYLIGHT", "SETPIXEL", "SETPIXELHSV", "FILLHSV",
    "SHOWLEDS", "LEDROTATE", "LEDREVERSE", "HSVTORGB", "RGBTOHSV", "RANDOM", "WAIT", "USEGAMMA",
    "SIN", "COS", "TAN", "EXP", "LOG", "LOG2", "ATAN2", "POW", "FMOD", "SQRT", "FLOOR", "CEIL",
    "MID$", "LEFT$", "RIGHT$", "CHR$", "UPPER$", "UCASE$", "LOWER$", "LCASE$", "TRIM$", "LTRIM$",
    "RTRIM$", "SPACE$", "HEX$", "OCT$", "STRING$", "LEN", "ASC", "VAL", "VAL#", "STR$", "INSTR",
    "ABS", "SGN", "INT", "FLOAT", "LIMIT", "LIMIT256", "SCALE", "SIN256", "DIST", "ANGLE", "TEMP",
    "TIMESTAMP", "VERSION", "LASTCOMM", "SETLEDCOL", "SETLEDRGB", "SETARRAY", "GETMAXLED",
    "WAITFOR", "LBOUND", "EOF", "SHIFTARRAY", "ROTATEARRAY", "COPYARRAY", "SCALELIMITARRAY",
    "RGBTOHSVARRAY", "HSVTORGBARRAY", "LUTTOARRAY", "ARRAYTOLUT",
];

/// Looks up a built-in by upper-case name.
pub fn lookup_builtin(name: &str) -> Option<Builtin> {
    use HostFn as H;
    let builtin = match name {
        // Parameters and control
        "GETPARAM" => host(H::GetParam, I1, Ret::Int),
        "SETPARAM" => host(H::SetParam, I2, Ret::Unit),
        "SHOULDSTOP" => host(H::ShouldStop, NONE, Ret::Int),
        "RANDOM" => host(H::RandomInt, I2, Ret::Int),
        "WAIT" => host(H::DelayMs, I1, Ret::Unit),
        "UPTIME" => host(H::Millis, NONE, Ret::Int),

        // Location
        "HASGPS" => host(H::GpsValid, NONE, Ret::Int),
        "HASORIGIN" => host(H::HasOrigin, NONE, Ret::Int),
        "GPSPRESENT" => host(H::GpsPresent, NONE, Ret::Int),
        "ORIGINDIST" => host(H::OriginDist, NONE, Ret::Truncate),
        "ORIGINANGLE" => host(H::OriginBearing, NONE, Ret::Truncate),
        "GPSSPEED" => host(H::GetSpeed, NONE, Ret::Truncate),
        "GPSDIR" => host(H::GetDir, NONE, Ret::Truncate),
        "GPSALT" => host(H::GetAlt, NONE, Ret::Truncate),
        "ORIGINDIST#" => host(H::OriginDist, NONE, Ret::Float),
        "ORIGINANGLE#" => host(H::OriginBearing, NONE, Ret::Float),
        "GPSSPEED#" => host(H::GetSpeed, NONE, Ret::Float),
        "GPSDIR#" => host(H::GetDir, NONE, Ret::Float),
        "GPSALT#" => host(H::GetAlt, NONE, Ret::Float),
        "GPSLAT#" => host(H::GetLat, NONE, Ret::Float),
        "GPSLON#" => host(H::GetLon, NONE, Ret::Float),

        // Clock
        "SECOND" => host(H::GetSecond, NONE, Ret::Int),
        "MINUTE" => host(H::GetMinute, NONE, Ret::Int),
        "HOUR" => host(H::GetHour, NONE, Ret::Int),
        "DAY" => host(H::GetDay, NONE, Ret::Int),
        "MONTH" => host(H::GetMonth, NONE, Ret::Int),
        "YEAR" => host(H::GetYear, NONE, Ret::Int),
        "DAYOFWEEK" => host(H::GetDayOfWeek, NONE, Ret::Int),
        "DAYOFYEAR" => host(H::GetDayOfYear, NONE, Ret::Int),
        "ISLEAPYEAR" => host(H::GetIsLeapYear, NONE, Ret::Int),
        "HASDATE" | "HASTIME" => host(H::TimeValid, NONE, Ret::Int),

        // Orientation and environment
        "HASGYRO" | "HASACC" | "HASMAG" => host(H::ImuValid, NONE, Ret::Int),
        "IMUPRESENT" => host(H::ImuPresent, NONE, Ret::Int),
        "PITCH" => host(H::GetPitch, NONE, Ret::Truncate),
        "ROLL" => host(H::GetRoll, NONE, Ret::Truncate),
        "YAW" => host(H::GetYaw, NONE, Ret::Truncate),
        "ACCX" => host(H::GetAccX, NONE, Ret::Truncate),
        "ACCY" => host(H::GetAccY, NONE, Ret::Truncate),
        "ACCZ" => host(H::GetAccZ, NONE, Ret::Truncate),
        "HUM" => host(H::GetHumidity, NONE, Ret::Truncate),
        "BRIGHT" => host(H::GetBrightness, NONE, Ret::Truncate),
        "PITCH#" => host(H::GetPitch, NONE, Ret::Float),
        "ROLL#" => host(H::GetRoll, NONE, Ret::Float),
        "YAW#" => host(H::GetYaw, NONE, Ret::Float),
        "ACCX#" => host(H::GetAccX, NONE, Ret::Float),
        "ACCY#" => host(H::GetAccY, NONE, Ret::Float),
        "ACCZ#" => host(H::GetAccZ, NONE, Ret::Float),
        "TEMP#" => host(H::GetTemp, NONE, Ret::Float),
        "HUM#" => host(H::GetHumidity, NONE, Ret::Float),
        "BRIGHT#" => host(H::GetBrightness, NONE, Ret::Float),

        // Power and sun
        "BATPCT" => host(H::GetBatteryPercentage, NONE, Ret::Truncate),
        "BATRUNTIME" => host(H::GetBatteryRuntime, NONE, Ret::Truncate),
        "SUNAZ" => host(H::GetSunAzimuth, NONE, Ret::Truncate),
        "SUNEL" => host(H::GetSunElevation, NONE, Ret::Truncate),
        "BATPCT#" => host(H::GetBatteryPercentage, NONE, Ret::Float),
        "BATRUNTIME#" => host(H::GetBatteryRuntime, NONE, Ret::Float),
        "SUNAZ#" => host(H::GetSunAzimuth, NONE, Ret::Float),
        "SUNEL#" => host(H::GetSunElevation, NONE, Ret::Float),
        "BATVOLT#" => host(H::GetBatVoltage, NONE, Ret::Float),
        "SOLARVOLT#" => host(H::GetSolarVoltage, NONE, Ret::Float),
        "SUNRISE" => host(H::GetSunrise, NONE, Ret::Int),
        "SUNSET" => host(H::GetSunset, NONE, Ret::Int),
        "HASSUN" => host(H::SunValid, NONE, Ret::Int),
        "ISDAYLIGHT" => host(H::IsDaylight, NONE, Ret::Int),

        // Lookup table
        "LOADLUT" => host(H::LutLoad, I1, Ret::Int),
        "SAVELUT" => host(H::LutSave, I1, Ret::Int),
        "LUTSIZE" => host(H::LutCheck, I1, Ret::Int),
        "LUT" => host(H::LutGet, I1, Ret::Int),
        "LUTSET" => host(H::LutSet, I2, Ret::Unit),
        "LUTCOUNT" => host(H::LutSize, NONE, Ret::Int),

        // Pins and cues
        "PIN_READ" => host(H::PinRead, I1, Ret::Int),
        "ANALOG_READ" => host(H::AnalogRead, I1, Ret::Int),
        "PIN_SET" => host(H::PinSet, I1, Ret::Unit),
        "PIN_CLEAR" => host(H::PinClear, I1, Ret::Unit),
        "CUEPLAYING" => host(H::CuePlaying, NONE, Ret::Int),
        "CUEELAPSED" => host(H::CueElapsed, NONE, Ret::Int),

        // LEDs
        "GAMMA256" => host(H::LedGamma8, I1, Ret::Int),
        "USEGAMMA" => host(H::LedSetGamma, I1, Ret::Unit),
        "SETPIXEL" => host(H::LedSetPixel, I5, Ret::Unit),
        "SETPIXELHSV" => host(H::LedSetPixelHsv, I5, Ret::Unit),
        "FILLHSV" => host(H::LedFillHsv, I4, Ret::Unit),
        "SHOWLEDS" => host(H::LedShow, NONE, Ret::Unit),
        "LEDROTATE" => host(H::LedRotate, I2, Ret::Unit),
        "LEDREVERSE" => host(H::LedReverse, I1, Ret::Unit),
        "HSVTORGB" => host(H::HsvToRgb, I3, Ret::Int),
        "RGBTOHSV" => host(H::RgbToHsv, I3, Ret::Int),

        // Float math
        "SIN" => host(H::Sinf, F1, Ret::Float),
        "COS" => host(H::Cosf, F1, Ret::Float),
        "TAN" => host(H::Tanf, F1, Ret::Float),
        "EXP" => host(H::Expf, F1, Ret::Float),
        "LOG" => host(H::Logf, F1, Ret::Float),
        "LOG2" => host(H::Log2f, F1, Ret::Float),
        "ATAN2" => host(H::Atan2f, F2, Ret::Float),
        "POW" => host(H::Powf, F2, Ret::Float),
        "FMOD" => host(H::Fmodf, F2, Ret::Float),
        "SQRT" => Builtin::Inline(Instr::F32Sqrt),
        "FLOOR" => Builtin::Inline(Instr::F32Floor),
        "CEIL" => Builtin::Inline(Instr::F32Ceil),

        // Strings
        "MID$" => host(H::StrMid, &[Arg::Str, Arg::Int, Arg::Int], Ret::Str),
        "LEFT$" => host(H::StrLeft, &[Arg::Str, Arg::Int], Ret::Str),
        "RIGHT$" => host(H::StrRight, &[Arg::Str, Arg::Int], Ret::Str),
        "CHR$" => host(H::StrChr, I1, Ret::Str),
        "UPPER$" | "UCASE$" => host(H::StrUpper, S1, Ret::Str),
        "LOWER$" | "LCASE$" => host(H::StrLower, S1, Ret::Str),
        "TRIM$" => host(H::StrTrim, S1, Ret::Str),
        "LTRIM$" => host(H::StrLtrim, S1, Ret::Str),
        "RTRIM$" => host(H::StrRtrim, S1, Ret::Str),
        "SPACE$" => host(H::StrSpace, I1, Ret::Str),
        "HEX$" => host(H::StrHex, I1, Ret::Str),
        "OCT$" => host(H::StrOct, I1, Ret::Str),
        "STRING$" => host(H::StrRepeat, I2, Ret::Str),
        "LEN" => host(H::StrLen, S1, Ret::Int),
        "ASC" => host(H::StrAsc, S1, Ret::Int),
        "VAL" => host(H::StrToInt, S1, Ret::Int),
        "VAL#" => host(H::StrToFloat, S1, Ret::Float),
        "STR$" => Builtin::Custom(Custom::Str),
        "INSTR" => Builtin::Custom(Custom::Instr),

        // Inline
        "ABS" => Builtin::Custom(Custom::Abs),
        "SGN" => Builtin::Custom(Custom::Sgn),
        "INT" => Builtin::Custom(Custom::Int),
        "FLOAT" => Builtin::Custom(Custom::Float),
        "LIMIT" => Builtin::Custom(Custom::Limit),
        "LIMIT256" => Builtin::Custom(Custom::Limit256),
        "SCALE" => Builtin::Custom(Custom::Scale),
        "SIN256" => Builtin::Custom(Custom::Sin256),
        "DIST" => Builtin::Custom(Custom::Dist),
        "ANGLE" => Builtin::Custom(Custom::Angle),
        "TEMP" => Builtin::Custom(Custom::Temp),
        "TIMESTAMP" => Builtin::Custom(Custom::Timestamp),
        "VERSION" => Builtin::Custom(Custom::Version),
        "LASTCOMM" => Builtin::Custom(Custom::LastComm),
        "SETLEDCOL" => Builtin::Custom(Custom::SetLedCol),
        "SETLEDRGB" => Builtin::Custom(Custom::SetLedRgb),
        "SETARRAY" => Builtin::Custom(Custom::SetArray),
        "GETMAXLED" => Builtin::Custom(Custom::GetMaxLed),
        "WAITFOR" => Builtin::Custom(Custom::WaitFor),
        "LBOUND" => Builtin::Custom(Custom::Lbound),
        "EOF" => Builtin::Custom(Custom::Eof),

        // Array helpers
        "SHIFTARRAY" | "RGBTOHSVARRAY" | "HSVTORGBARRAY" => Builtin::Ignored(3),
        "ROTATEARRAY" | "COPYARRAY" => Builtin::Ignored(2),
        "SCALELIMITARRAY" => Builtin::Ignored(4),
        "LUTTOARRAY" | "ARRAYTOLUT" => Builtin::Ignored(1),
        _ => return None,
    };
    Some(builtin)
}

impl Compiler<'_> {
    /// Compiles a built-in call; the opening parenthesis is consumed.
    pub(crate) fn builtin(&mut self, builtin: Builtin, name: &Token) -> CompileResult<Kind> {
        let upper = name.name();
        match builtin {
            Builtin::Host { host, args, ret } => {
                self.arguments(&upper, args, args.len(), true)?;
                self.call_host(host);
                match ret {
                    Ret::Truncate => self.emit(Instr::I32TruncF32S),
                    Ret::Unit => self.push_i32(0),
                    Ret::Int | Ret::Float | Ret::Str => {}
                }
                Ok(ret.kind())
            }
            Builtin::Inline(op) => {
                self.arguments(&upper, F1, 1, true)?;
                self.emit(op);
                Ok(Kind::Float)
            }
            Builtin::Ignored(count) => {
                let args = vec![Arg::Int; count];
                self.arguments(&upper, &args, count, true)?;
                for _ in 0..count {
                    self.emit(Instr::Drop);
                }
                self.push_i32(0);
                Ok(Kind::Int)
            }
            Builtin::Custom(Custom::Lbound) => {
                let array = self.expect_name("array name")?;
                let id = self.array_id(&array)?;
                // Every dimension shares the lower bound
                if self.match_token(TokenKind::Comma)? {
                    self.int_expression()?;
                    self.emit(Instr::Drop);
                }
                self.expect(TokenKind::RightParen, "')'")?;
                let lbound = self.symbols.get(id).array().map_or(1, |shape| shape.lbound());
                self.push_i32(lbound);
                Ok(Kind::Int)
            }
            Builtin::Custom(Custom::Eof) => {
                let channel = self.channel_literal()?;
                self.expect(TokenKind::RightParen, "')'")?;
                self.push_i32(0);
                self.load_file_handle(channel);
                self.call_host(HostFn::FileEof);
                self.emit(Instr::I32Sub);
                Ok(Kind::Int)
            }
            Builtin::Custom(custom) => {
                let (args, required) = custom.args();
                let kinds = self.arguments(&upper, args, required, true)?;
                self.custom(custom, &kinds)
            }
        }
    }

    /// Parses an argument list, converting each argument.
    ///
    /// With `parenthesized` the list runs to `)`, otherwise to the end of
    /// the statement. Returns the kinds left on the stack.
    pub(crate) fn arguments(
        &mut self,
        name: &str,
        arg_kinds: &[Arg],
        required: usize,
        parenthesized: bool,
    ) -> CompileResult<Vec<Kind>> {
        let mut kinds = Vec::new();
        let empty = if parenthesized {
            self.check(TokenKind::RightParen)?
        } else {
            self.at_end()?
        };
        if !empty {
            loop {
                let kind = self.expression()?;
                let kind = match arg_kinds.get(kinds.len()) {
                    Some(arg) => self.convert_arg(*arg, kind)?,
                    None => kind,
                };
                kinds.push(kind);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        if parenthesized {
            self.expect(TokenKind::RightParen, "')'")?;
        }
        if kinds.len() < required || kinds.len() > arg_kinds.len() {
            let expected = if required == arg_kinds.len() {
                required.to_string()
            } else {
                format!("{required} to {}", arg_kinds.len())
            };
            return Err(self.error(ErrorKind::ArgumentCount {
                name: name.to_string(),
                expected,
                found: kinds.len(),
            }));
        }
        Ok(kinds)
    }

    fn convert_arg(&mut self, arg: Arg, kind: Kind) -> CompileResult<Kind> {
        match arg {
            Arg::Int => self.coerce(kind, Kind::Int).map(|_| Kind::Int),
            Arg::Float => self.coerce(kind, Kind::Float).map(|_| Kind::Float),
            Arg::Str | Arg::Num => {
                let wanted_str = arg == Arg::Str;
                if (kind == Kind::Str) != wanted_str {
                    let wanted = if wanted_str { "string" } else { "number" };
                    return Err(self.error(ErrorKind::mismatch(format!(
                        "expected {wanted} argument, found {kind}"
                    ))));
                }
                Ok(kind)
            }
        }
    }

    /// Pops `types.len()` values into fresh locals, last argument first.
    /// Returns the locals in argument order.
    fn spill(&mut self, types: &[ValType]) -> Vec<u32> {
        let locals: Vec<u32> = types.iter().map(|ty| self.alloc_local(*ty)).collect();
        for local in locals.iter().rev() {
            self.emit(Instr::LocalSet(*local));
        }
        locals
    }

    fn custom(&mut self, custom: Custom, kinds: &[Kind]) -> CompileResult<Kind> {
        use Instr::*;
        let i32s = |n: usize| vec![ValType::I32; n];
        match custom {
            Custom::Abs => {
                if kinds[0] == Kind::Float {
                    self.emit(F32Abs);
                    return Ok(Kind::Float);
                }
                let v = self.spill(&i32s(1))[0];
                self.emit_all(&[
                    I32Const(0),
                    LocalGet(v),
                    I32Sub,
                    LocalGet(v),
                    LocalGet(v),
                    I32Const(0),
                    I32LtS,
                    Select,
                ]);
                Ok(Kind::Int)
            }
            Custom::Sgn => {
                if kinds[0] == Kind::Float {
                    let v = self.spill(&[ValType::F32])[0];
                    self.emit_all(&[
                        LocalGet(v),
                        F32Const(0.0),
                        F32Gt,
                        LocalGet(v),
                        F32Const(0.0),
                        F32Lt,
                        I32Sub,
                    ]);
                } else {
                    let v = self.spill(&i32s(1))[0];
                    self.emit_all(&[
                        LocalGet(v),
                        I32Const(0),
                        I32GtS,
                        LocalGet(v),
                        I32Const(0),
                        I32LtS,
                        I32Sub,
                    ]);
                }
                Ok(Kind::Int)
            }
            Custom::Int => {
                self.coerce(Kind::Float, Kind::Int)?;
                Ok(Kind::Int)
            }
            Custom::Float => {
                self.coerce(Kind::Int, Kind::Float)?;
                Ok(Kind::Float)
            }
            Custom::Str => {
                let host = if kinds[0] == Kind::Float {
                    HostFn::StrFromFloat
                } else {
                    HostFn::StrFromInt
                };
                self.call_host(host);
                Ok(Kind::Str)
            }
            Custom::Instr => {
                if kinds.len() == 2 {
                    self.push_i32(1);
                }
                self.call_host(HostFn::StrInstr);
                Ok(Kind::Int)
            }
            Custom::Limit => {
                let l = self.spill(&i32s(3));
                let (v, lo, hi) = (l[0], l[1], l[2]);
                self.clamp(v, LocalGet(lo), LocalGet(hi));
                Ok(Kind::Int)
            }
            Custom::Limit256 => {
                let v = self.spill(&i32s(1))[0];
                self.clamp(v, I32Const(0), I32Const(255));
                Ok(Kind::Int)
            }
            Custom::Scale => {
                let l = self.spill(&i32s(5));
                let (v, vmin, vmax, rmin, rmax) = (l[0], l[1], l[2], l[3], l[4]);
                self.emit_all(&[
                    LocalGet(v),
                    LocalGet(vmin),
                    I32Sub,
                    LocalGet(rmax),
                    LocalGet(rmin),
                    I32Sub,
                    I32Mul,
                    LocalGet(vmax),
                    LocalGet(vmin),
                    I32Sub,
                    I32DivS,
                    LocalGet(rmin),
                    I32Add,
                ]);
                Ok(Kind::Int)
            }
            Custom::Sin256 => {
                self.emit_all(&[F32ConvertI32S, F32Const(255.0), F32Div]);
                self.emit_all(&[F32Const(std::f32::consts::TAU), F32Mul]);
                self.call_host(HostFn::Sinf);
                self.emit_all(&[
                    F32Const(1.0),
                    F32Add,
                    F32Const(0.5),
                    F32Mul,
                    F32Const(255.0),
                    F32Mul,
                    I32TruncF32S,
                ]);
                Ok(Kind::Int)
            }
            Custom::Dist => {
                let l = self.spill(&i32s(4));
                let (x1, y1, x2, y2) = (l[0], l[1], l[2], l[3]);
                let dx = self.alloc_local(ValType::F32);
                let dy = self.alloc_local(ValType::F32);
                self.emit_all(&[
                    LocalGet(x2),
                    LocalGet(x1),
                    I32Sub,
                    F32ConvertI32S,
                    LocalSet(dx),
                    LocalGet(y2),
                    LocalGet(y1),
                    I32Sub,
                    F32ConvertI32S,
                    LocalSet(dy),
                    LocalGet(dx),
                    LocalGet(dx),
                    F32Mul,
                    LocalGet(dy),
                    LocalGet(dy),
                    F32Mul,
                    F32Add,
                    F32Sqrt,
                    I32TruncF32S,
                ]);
                Ok(Kind::Int)
            }
            Custom::Angle => {
                let l = self.spill(&i32s(4));
                let (x1, y1, x2, y2) = (l[0], l[1], l[2], l[3]);
                self.emit_all(&[
                    LocalGet(y2),
                    LocalGet(y1),
                    I32Sub,
                    F32ConvertI32S,
                    LocalGet(x2),
                    LocalGet(x1),
                    I32Sub,
                    F32ConvertI32S,
                ]);
                self.call_host(HostFn::Atan2f);
                self.emit_all(&[F32Const(57.29578), F32Mul, I32TruncF32S]);
                Ok(Kind::Int)
            }
            Custom::Temp => {
                self.call_host(HostFn::GetTemp);
                self.emit_all(&[F32Const(10.0), F32Mul, I32TruncF32S]);
                Ok(Kind::Int)
            }
            Custom::Timestamp => {
                let divisor = self.spill(&i32s(1))[0];
                self.call_host(HostFn::Millis);
                self.emit_all(&[LocalGet(divisor), I32DivS]);
                Ok(Kind::Int)
            }
            Custom::Version => {
                self.push_i32(1);
                Ok(Kind::Int)
            }
            Custom::LastComm => {
                self.push_i32(0);
                Ok(Kind::Int)
            }
            Custom::GetMaxLed => {
                self.push_i32(1);
                self.call_host(HostFn::LedCount);
                Ok(Kind::Int)
            }
            Custom::SetLedCol => {
                let l = self.spill(&i32s(3));
                self.emit_all(&[I32Const(1), LocalGet(l[0]), LocalGet(l[1]), LocalGet(l[2])]);
                self.call_host(HostFn::LedFill);
                self.call_host(HostFn::LedShow);
                self.push_i32(0);
                Ok(Kind::Int)
            }
            Custom::SetLedRgb => {
                let arrays = self.spill(&i32s(3));
                let i = self.alloc_local(ValType::I32);
                self.emit_all(&[I32Const(0), LocalSet(i), Block, Loop]);
                self.emit_all(&[LocalGet(i), I32Const(1)]);
                self.call_host(HostFn::LedCount);
                self.emit_all(&[I32GeS, BrIf(1), I32Const(1), LocalGet(i)]);
                for array in arrays {
                    self.emit_element_address(LocalGet(array), i);
                    self.emit(I32Load(0));
                }
                self.call_host(HostFn::LedSetPixel);
                self.emit_all(&[LocalGet(i), I32Const(1), I32Add, LocalSet(i), Br(0), End, End]);
                self.call_host(HostFn::LedShow);
                self.push_i32(0);
                Ok(Kind::Int)
            }
            Custom::SetArray => {
                let l = self.spill(&i32s(4));
                let (array, start, end, value) = (l[0], l[1], l[2], l[3]);
                let i = self.alloc_local(ValType::I32);
                self.emit_all(&[LocalGet(start), LocalSet(i), Block, Loop]);
                self.emit_all(&[LocalGet(i), LocalGet(end), I32GtS, BrIf(1)]);
                self.emit_element_address(LocalGet(array), i);
                self.emit_all(&[LocalGet(value), I32Store(0)]);
                self.emit_all(&[LocalGet(i), I32Const(1), I32Add, LocalSet(i), Br(0), End, End]);
                self.push_i32(0);
                Ok(Kind::Int)
            }
            Custom::WaitFor => {
                let l = self.spill(&i32s(5));
                let (event, source, condition, trigger, timeout) = (l[0], l[1], l[2], l[3], l[4]);
                let result = Some(ValType::I32);
                // Event 4: timer, trigger scaled by the unit in `condition`
                self.emit_all(&[LocalGet(event), I32Const(4), I32Eq, If(result)]);
                self.emit(LocalGet(trigger));
                self.emit(I32Const(1));
                for (unit, millis) in [(8, 1000), (7, 60_000), (6, 3_600_000)] {
                    self.emit_all(&[
                        I32Const(millis),
                        LocalGet(condition),
                        I32Const(unit),
                        I32Ne,
                        Select,
                    ]);
                }
                self.emit(I32Mul);
                self.call_host(HostFn::DelayMs);
                self.emit_all(&[I32Const(1), Else]);
                // Event 5: pulse per second
                self.emit_all(&[LocalGet(event), I32Const(5), I32Eq, If(result)]);
                self.emit(LocalGet(timeout));
                self.call_host(HostFn::WaitPps);
                self.emit(Else);
                // Event 6: parameter condition
                self.emit_all(&[LocalGet(event), I32Const(6), I32Eq, If(result)]);
                self.emit_all(&[
                    LocalGet(source),
                    LocalGet(condition),
                    LocalGet(trigger),
                    LocalGet(timeout),
                ]);
                self.call_host(HostFn::WaitParam);
                self.emit_all(&[Else, I32Const(0), End, End, End]);
                Ok(Kind::Int)
            }
            Custom::Lbound | Custom::Eof => Ok(Kind::Int),
        }
    }

    /// `v` limited to `lo..=hi`.
    fn clamp(&mut self, v: u32, lo: Instr, hi: Instr) {
        use Instr::*;
        let low = self.alloc_local(ValType::I32);
        self.emit_all(&[lo, LocalGet(v), LocalGet(v), lo, I32LtS, Select, LocalSet(low)]);
        self.emit_all(&[hi, LocalGet(low), LocalGet(low), hi, I32GtS, Select]);
    }

    /// `base + (1 + i) * 4`, with the base produced by `base`.
    fn emit_element_address(&mut self, base: Instr, index: u32) {
        self.emit_all(&[
            base,
            Instr::LocalGet(index),
            Instr::I32Const(1),
            Instr::I32Add,
            Instr::I32Const(ELEMENT_SIZE as i32),
            Instr::I32Mul,
            Instr::I32Add,
        ]);
    }

    /// Parses a channel number literal `1..=FILE_CHANNELS`, with an
    /// optional leading `#`.
    pub(crate) fn channel_literal(&mut self) -> CompileResult<i32> {
        self.match_token(TokenKind::Hash)?;
        let token = self.expect(TokenKind::IntegerLiteral, "channel number")?;
        match token.int_value() {
            Some(n) if (1..=FILE_CHANNELS).contains(&n) => Ok(n),
            _ => Err(self.error_at(
                ErrorKind::BadChannel {
                    max: FILE_CHANNELS,
                },
                &token,
            )),
        }
    }

    /// Address of a channel's slot in the file table.
    pub(crate) fn file_slot(channel: i32) -> i32 {
        FILE_TABLE_BASE as i32 + (channel - 1) * 4
    }

    /// Pushes the host handle stored for `channel`.
    pub(crate) fn load_file_handle(&mut self, channel: i32) {
        self.emit_all(&[Instr::I32Const(Self::file_slot(channel)), Instr::I32Load(0)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::compiler::tests::{build, fail};

    #[test]
    fn test_every_listed_name_resolves() {
        for name in BUILTIN_NAMES {
            assert!(lookup_builtin(name).is_some(), "{name} is not a built-in");
        }
        assert!(lookup_builtin("NOPE").is_none());
    }

    #[test]
    fn test_host_builtins_match_import_signatures() {
        for name in BUILTIN_NAMES {
            let Some(Builtin::Host { host, args, ret }) = lookup_builtin(name) else {
                continue;
            };
            let d = host.descriptor();
            let params: Vec<ValType> = args
                .iter()
                .map(|a| match a {
                    Arg::Float => ValType::F32,
                    _ => ValType::I32,
                })
                .collect();
            assert_eq!(params, d.params, "{name}");
            let result = match ret {
                Ret::Unit => None,
                Ret::Float | Ret::Truncate => Some(ValType::F32),
                Ret::Int | Ret::Str => Some(ValType::I32),
            };
            assert_eq!(result, host.result(), "{name}");
        }
    }

    #[test]
    fn test_every_builtin_compiles_to_valid_code() {
        let mut source = String::from("DIM A(4)\n");
        for name in BUILTIN_NAMES {
            let builtin = lookup_builtin(name).unwrap();
            let args = match builtin {
                Builtin::Host { args, .. } => args
                    .iter()
                    .map(|a| if *a == Arg::Str { "\"s\"" } else { "1" })
                    .collect::<Vec<_>>()
                    .join(", "),
                Builtin::Custom(Custom::Lbound) => "A".to_string(),
                Builtin::Custom(Custom::Instr) => "\"ab\", \"b\"".to_string(),
                _ => {
                    let (min, _) = builtin.arity();
                    vec!["1"; min].join(", ")
                }
            };
            let target = if matches!(
                builtin,
                Builtin::Host { ret: Ret::Str, .. } | Builtin::Custom(Custom::Str)
            ) {
                "S$"
            } else {
                "N"
            };
            source.push_str(&format!("{target} = {name}({args})\n"));
        }
        build(&source);
    }

    #[test]
    fn test_wrong_argument_count() {
        let err = fail("X = RANDOM(1)");
        assert_eq!(
            err.kind,
            ErrorKind::ArgumentCount {
                name: "RANDOM".into(),
                expected: "2".into(),
                found: 1
            }
        );
        let err = fail("X = INSTR(\"a\")");
        assert!(matches!(err.kind, ErrorKind::ArgumentCount { expected, .. } if expected == "2 to 3"));
    }

    #[test]
    fn test_string_argument_required() {
        let err = fail("X = LEN(5)");
        assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
        let err = fail("X = SIN(\"a\")");
        assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn test_only_called_imports_are_marked() {
        let program = compile_program("X = SQRT(2)\nY = SIN(1)").unwrap();
        let used: Vec<_> = program.imports.used().collect();
        assert_eq!(used, vec![HostFn::Sinf]);
    }

    #[test]
    fn test_eof_channel_range() {
        let err = fail("X = EOF(5)");
        assert_eq!(err.kind, ErrorKind::BadChannel { max: 4 });
    }

    #[test]
    fn test_builtin_shadows_subroutine() {
        let program = compile_program("SUB LEN(A$)\nEND SUB\nX = LEN(\"abc\")").unwrap();
        assert!(program.imports.is_used(HostFn::StrLen));
    }

    #[test]
    fn test_lbound_requires_array() {
        let err = fail("X = 1\nY = LBOUND(X)");
        assert!(matches!(err.kind, ErrorKind::WrongStorage { .. }));
    }

    #[test]
    fn test_lbound_follows_option_base() {
        let lbound = |source: &str| {
            let program = compile_program(source).unwrap();
            program.functions[0]
                .body()
                .iter()
                .rev()
                .find_map(|instr| match instr {
                    Instr::I32Const(v) => Some(*v),
                    _ => None,
                })
        };
        assert_eq!(lbound("DIM A(4)\nL = LBOUND(A)"), Some(1));
        assert_eq!(lbound("OPTION BASE 0\nDIM A(4)\nL = LBOUND(A)"), Some(0));
        assert_eq!(lbound("OPTION BASE 1\nDIM M(2, 2)\nL = LBOUND(M, 2)"), Some(1));
    }
}
