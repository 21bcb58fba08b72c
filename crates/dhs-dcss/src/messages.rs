//! DCSS message catalogue.
//!
//! A DCSS message is one line of space separated tokens whose first token
//! is the type id. `stoc_`/`stoh_` messages come from the server, `htos_`
//! messages go to it.

use std::fmt;

use dhs_core::{Inbound, MessageKind, Outbound, Parse};

/// Join tokens with single spaces, skipping empty ones.
fn join(tokens: &[&str]) -> String {
    tokens
        .iter()
        .filter(|t| !t.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

macro_rules! inbound {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal { $($field:ident),* $(,)? } $(.. $rest:ident)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: String,)*
            $(pub $rest: Vec<String>,)?
        }

        impl MessageKind for $name {
            const TYPE_ID: &'static str = $id;
        }

        impl Inbound for $name {
            fn message_type(&self) -> &'static str {
                $id
            }
        }

        impl Parse<String> for $name {
            fn parse(raw: &String) -> Option<Self> {
                let mut tokens = raw.split_whitespace();
                if tokens.next()? != $id {
                    return None;
                }
                $(let $field = tokens.next()?.to_string();)*
                $(let $rest = tokens.map(str::to_string).collect();)?
                Some(Self {
                    $($field,)*
                    $($rest,)?
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str($id)?;
                $(write!(f, " {}", self.$field)?;)*
                $(for arg in &self.$rest {
                    write!(f, " {arg}")?;
                })?
                Ok(())
            }
        }
    };
}

macro_rules! outbound {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal { $($field:ident : $ty:ty),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl MessageKind for $name {
            const TYPE_ID: &'static str = $id;
        }

        impl Outbound<String> for $name {
            fn message_type(&self) -> &'static str {
                $id
            }

            fn write(&self) -> String {
                let fields: Vec<String> = vec![$(self.$field.to_string()),*];
                let mut tokens = vec![$id];
                tokens.extend(fields.iter().map(String::as_str));
                join(&tokens)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.write())
            }
        }
    };
}

// Server to hardware.

inbound! {
    /// Asks the client to identify itself. Answer with [`HtosClientIsHardware`].
    StocSendClientType = "stoc_send_client_type" {}
}

inbound! {
    /// Announces an operation this DHS is responsible for.
    StohRegisterOperation = "stoh_register_operation" { operation_name, hardware_name }
}

inbound! {
    StohRegisterRealMotor = "stoh_register_real_motor" { motor_name, hardware_name }
}

inbound! {
    StohRegisterPseudoMotor = "stoh_register_pseudo_motor" { motor_name, hardware_name }
}

inbound! {
    StohRegisterString = "stoh_register_string" { string_name, hardware_name }
}

inbound! {
    StohRegisterShutter = "stoh_register_shutter" { shutter_name, status, hardware_name }
}

inbound! {
    StohRegisterIonChamber = "stoh_register_ion_chamber" {
        ion_chamber_name,
        hardware_name,
        counter_channel,
        timer,
        timer_type,
    }
}

inbound! {
    StohRegisterEncoder = "stoh_register_encoder" { encoder_name, hardware_name }
}

inbound! {
    StohRegisterObject = "stoh_register_object" { object_name, hardware_name }
}

inbound! {
    StohConfigureRealMotor = "stoh_configure_real_motor" {
        motor_name,
        position,
        upper_limit,
        lower_limit,
        scale_factor,
        speed,
        acceleration,
        backlash,
        lower_limit_on,
        upper_limit_on,
        motor_lock_on,
        backlash_on,
        reverse_on,
    }
}

inbound! {
    StohConfigurePseudoMotor = "stoh_configure_pseudo_motor" {
        motor_name,
        position,
        upper_limit,
        lower_limit,
        lower_limit_on,
        upper_limit_on,
        motor_lock_on,
    }
}

inbound! {
    StohSetMotorPosition = "stoh_set_motor_position" { motor_name, position }
}

inbound! {
    StohStartMotorMove = "stoh_start_motor_move" { motor_name, position }
}

inbound! {
    StohAbortAll = "stoh_abort_all" { abort_arg }
}

inbound! {
    StohCorrectMotorPosition = "stoh_correct_motor_position" { motor_name, correction }
}

inbound! {
    StohSetMotorDependency = "stoh_set_motor_dependency" { motor_name } ..dependencies
}

inbound! {
    StohSetMotorChildren = "stoh_set_motor_children" { motor_name } ..children
}

inbound! {
    StohSetShutterState = "stoh_set_shutter_state" { shutter_name, state }
}

inbound! {
    /// Starts one instance of a registered operation. The handle is unique
    /// per instance; several instances of one operation may run at once.
    StohStartOperation = "stoh_start_operation" { operation_name, operation_handle } ..args
}

impl StohStartOperation {
    /// Progress update for this operation instance.
    pub fn update(&self, args: impl Into<String>) -> HtosOperationUpdate {
        HtosOperationUpdate::new(&self.operation_name, &self.operation_handle, args)
    }

    /// Successful completion of this operation instance.
    pub fn completed(&self, args: impl Into<String>) -> HtosOperationCompleted {
        HtosOperationCompleted::normal(&self.operation_name, &self.operation_handle, args)
    }

    /// Failed completion; `reason` must be a single token.
    pub fn failed(&self, reason: impl Into<String>, args: impl Into<String>) -> HtosOperationCompleted {
        HtosOperationCompleted::failed(&self.operation_name, &self.operation_handle, reason, args)
    }
}

// Hardware to server.

outbound! {
    HtosClientIsHardware = "htos_client_is_hardware" { dhs_name: String }
}

impl HtosClientIsHardware {
    pub fn new(dhs_name: impl Into<String>) -> Self {
        Self {
            dhs_name: dhs_name.into(),
        }
    }
}

outbound! {
    HtosMotorMoveStarted = "htos_motor_move_started" { motor_name: String, position: f64 }
}

outbound! {
    /// `status` is `normal`, `aborted`, `moving`, `cw_hw_limit`,
    /// `ccw_hw_limit`, `both_hw_limits` or `unknown`.
    HtosMotorMoveCompleted = "htos_motor_move_completed" {
        motor_name: String,
        position: f64,
        status: String,
    }
}

outbound! {
    /// Any status other than `normal` reports the operation as failed, with
    /// the status token as the reason.
    HtosOperationCompleted = "htos_operation_completed" {
        operation_name: String,
        operation_handle: String,
        status: String,
        args: String,
    }
}

pub const STATUS_NORMAL: &str = "normal";

impl HtosOperationCompleted {
    fn with_status(
        name: impl Into<String>,
        handle: impl Into<String>,
        status: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self {
            operation_name: name.into(),
            operation_handle: handle.into(),
            status: status.into(),
            args: args.into(),
        }
    }

    pub fn normal(name: impl Into<String>, handle: impl Into<String>, args: impl Into<String>) -> Self {
        Self::with_status(name, handle, STATUS_NORMAL, args)
    }

    pub fn failed(
        name: impl Into<String>,
        handle: impl Into<String>,
        reason: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self::with_status(name, handle, reason, args)
    }

    pub fn is_normal(&self) -> bool {
        self.status == STATUS_NORMAL
    }
}

outbound! {
    HtosOperationUpdate = "htos_operation_update" {
        operation_name: String,
        operation_handle: String,
        args: String,
    }
}

impl HtosOperationUpdate {
    pub fn new(name: impl Into<String>, handle: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            operation_name: name.into(),
            operation_handle: handle.into(),
            args: args.into(),
        }
    }
}

outbound! {
    HtosStartOperation = "htos_start_operation" { operation_info: String }
}

outbound! {
    HtosUpdateMotorPosition = "htos_update_motor_position" {
        motor_name: String,
        position: f64,
        status: String,
    }
}

outbound! {
    HtosReportIonChambers = "htos_report_ion_chambers" { counts: i64 }
}

outbound! {
    HtosConfigureDevice = "htos_configure_device" { device_name: String, settings: String }
}

outbound! {
    HtosSendConfiguration = "htos_send_configuration" { device_name: String }
}

outbound! {
    HtosReportShutterState = "htos_report_shutter_state" {
        shutter_name: String,
        state: String,
        result: String,
    }
}

outbound! {
    HtosLimitHit = "htos_limit_hit" { state: String }
}

outbound! {
    HtosSimulatingDevice = "htos_simulating_device" { state: String }
}

outbound! {
    HtosMotorCorrectStarted = "htos_motor_correct_started" { state: String }
}

outbound! {
    HtosGetEncoderCompleted = "htos_get_encoder_completed" {
        encoder_name: String,
        position: f64,
        status: String,
    }
}

outbound! {
    HtosSetEncoderCompleted = "htos_set_encoder_completed" {
        encoder_name: String,
        position: i64,
        status: String,
    }
}

outbound! {
    HtosSetStringCompleted = "htos_set_string_completed" { string_name: String, status: String }
}

outbound! {
    HtosNote = "htos_note" { message: String }
}

outbound! {
    HtosLog = "htos_log" { message: String }
}

outbound! {
    HtosSetMotorMessage = "htos_set_motor_message" { motor_name: String }
}
