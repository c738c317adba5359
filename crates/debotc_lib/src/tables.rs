//! Static catalogs for the BOTC object format: the 71 data headers, the 93
//! builtin bot commands, and the bot event names. Ordinal order is part of
//! the wire format and must never change.

use serde::Serialize;

/// Number of data headers understood by the format.
pub const NUM_DATA_HEADERS: i32 = 71;
/// Number of builtin bot commands.
pub const NUM_BOT_COMMANDS: i32 = 93;
/// Maximum number of events a named state may hold.
pub const MAX_NUM_EVENTS: usize = 32;
/// Maximum number of scripted events the global state may hold.
pub const MAX_NUM_GLOBAL_EVENTS: usize = 32;

/// Data header of a record in the compiled object stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    Command,
    StateIdx,
    StateName,
    OnEnter,
    MainLoop,
    OnExit,
    Event,
    EndOnEnter,
    EndMainLoop,
    EndOnExit,
    EndEvent,
    IfGoto,
    IfNotGoto,
    Goto,
    OrLogical,
    AndLogical,
    OrBitwise,
    EorBitwise,
    AndBitwise,
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
    NegateLogical,
    LShift,
    RShift,
    Add,
    Subtract,
    UnaryMinus,
    Multiply,
    Divide,
    Modulus,
    PushNumber,
    PushStringIndex,
    PushGlobalVar,
    PushLocalVar,
    DropStackPosition,
    ScriptVarList,
    StringList,
    IncGlobalVar,
    DecGlobalVar,
    AssignGlobalVar,
    AddGlobalVar,
    SubGlobalVar,
    MulGlobalVar,
    DivGlobalVar,
    ModGlobalVar,
    IncLocalVar,
    DecLocalVar,
    AssignLocalVar,
    AddLocalVar,
    SubLocalVar,
    MulLocalVar,
    DivLocalVar,
    ModLocalVar,
    CaseGoto,
    Drop,
    IncGlobalArray,
    DecGlobalArray,
    AssignGlobalArray,
    AddGlobalArray,
    SubGlobalArray,
    MulGlobalArray,
    DivGlobalArray,
    ModGlobalArray,
    PushGlobalArray,
    Swap,
    Dup,
    ArraySet,
}

/// All opcodes in ordinal order.
pub(crate) const OPCODES: [Opcode; NUM_DATA_HEADERS as usize] = [
    Opcode::Command,
    Opcode::StateIdx,
    Opcode::StateName,
    Opcode::OnEnter,
    Opcode::MainLoop,
    Opcode::OnExit,
    Opcode::Event,
    Opcode::EndOnEnter,
    Opcode::EndMainLoop,
    Opcode::EndOnExit,
    Opcode::EndEvent,
    Opcode::IfGoto,
    Opcode::IfNotGoto,
    Opcode::Goto,
    Opcode::OrLogical,
    Opcode::AndLogical,
    Opcode::OrBitwise,
    Opcode::EorBitwise,
    Opcode::AndBitwise,
    Opcode::Equals,
    Opcode::NotEquals,
    Opcode::LessThan,
    Opcode::LessThanEquals,
    Opcode::GreaterThan,
    Opcode::GreaterThanEquals,
    Opcode::NegateLogical,
    Opcode::LShift,
    Opcode::RShift,
    Opcode::Add,
    Opcode::Subtract,
    Opcode::UnaryMinus,
    Opcode::Multiply,
    Opcode::Divide,
    Opcode::Modulus,
    Opcode::PushNumber,
    Opcode::PushStringIndex,
    Opcode::PushGlobalVar,
    Opcode::PushLocalVar,
    Opcode::DropStackPosition,
    Opcode::ScriptVarList,
    Opcode::StringList,
    Opcode::IncGlobalVar,
    Opcode::DecGlobalVar,
    Opcode::AssignGlobalVar,
    Opcode::AddGlobalVar,
    Opcode::SubGlobalVar,
    Opcode::MulGlobalVar,
    Opcode::DivGlobalVar,
    Opcode::ModGlobalVar,
    Opcode::IncLocalVar,
    Opcode::DecLocalVar,
    Opcode::AssignLocalVar,
    Opcode::AddLocalVar,
    Opcode::SubLocalVar,
    Opcode::MulLocalVar,
    Opcode::DivLocalVar,
    Opcode::ModLocalVar,
    Opcode::CaseGoto,
    Opcode::Drop,
    Opcode::IncGlobalArray,
    Opcode::DecGlobalArray,
    Opcode::AssignGlobalArray,
    Opcode::AddGlobalArray,
    Opcode::SubGlobalArray,
    Opcode::MulGlobalArray,
    Opcode::DivGlobalArray,
    Opcode::ModGlobalArray,
    Opcode::PushGlobalArray,
    Opcode::Swap,
    Opcode::Dup,
    Opcode::ArraySet,
];

impl Opcode {
    /// Looks up an opcode by its wire ordinal.
    pub fn from_index(index: i32) -> Option<Opcode> {
        usize::try_from(index)
            .ok()
            .and_then(|i| OPCODES.get(i).copied())
    }

    pub fn index(self) -> i32 {
        OPCODES.iter().position(|&op| op == self).unwrap_or(0) as i32
    }

    /// The `DH_*` mnemonic used in disassembly listings.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Command => "DH_COMMAND",
            Opcode::StateIdx => "DH_STATEIDX",
            Opcode::StateName => "DH_STATENAME",
            Opcode::OnEnter => "DH_ONENTER",
            Opcode::MainLoop => "DH_MAINLOOP",
            Opcode::OnExit => "DH_ONEXIT",
            Opcode::Event => "DH_EVENT",
            Opcode::EndOnEnter => "DH_ENDONENTER",
            Opcode::EndMainLoop => "DH_ENDMAINLOOP",
            Opcode::EndOnExit => "DH_ENDONEXIT",
            Opcode::EndEvent => "DH_ENDEVENT",
            Opcode::IfGoto => "DH_IFGOTO",
            Opcode::IfNotGoto => "DH_IFNOTGOTO",
            Opcode::Goto => "DH_GOTO",
            Opcode::OrLogical => "DH_ORLOGICAL",
            Opcode::AndLogical => "DH_ANDLOGICAL",
            Opcode::OrBitwise => "DH_ORBITWISE",
            Opcode::EorBitwise => "DH_EORBITWISE",
            Opcode::AndBitwise => "DH_ANDBITWISE",
            Opcode::Equals => "DH_EQUALS",
            Opcode::NotEquals => "DH_NOTEQUALS",
            Opcode::LessThan => "DH_LESSTHAN",
            Opcode::LessThanEquals => "DH_LESSTHANEQUALS",
            Opcode::GreaterThan => "DH_GREATERTHAN",
            Opcode::GreaterThanEquals => "DH_GREATERTHANEQUALS",
            Opcode::NegateLogical => "DH_NEGATELOGICAL",
            Opcode::LShift => "DH_LSHIFT",
            Opcode::RShift => "DH_RSHIFT",
            Opcode::Add => "DH_ADD",
            Opcode::Subtract => "DH_SUBTRACT",
            Opcode::UnaryMinus => "DH_UNARYMINUS",
            Opcode::Multiply => "DH_MULTIPLY",
            Opcode::Divide => "DH_DIVIDE",
            Opcode::Modulus => "DH_MODULUS",
            Opcode::PushNumber => "DH_PUSHNUMBER",
            Opcode::PushStringIndex => "DH_PUSHSTRINGINDEX",
            Opcode::PushGlobalVar => "DH_PUSHGLOBALVAR",
            Opcode::PushLocalVar => "DH_PUSHLOCALVAR",
            Opcode::DropStackPosition => "DH_DROPSTACKPOSITION",
            Opcode::ScriptVarList => "DH_SCRIPTVARLIST",
            Opcode::StringList => "DH_STRINGLIST",
            Opcode::IncGlobalVar => "DH_INCGLOBALVAR",
            Opcode::DecGlobalVar => "DH_DECGLOBALVAR",
            Opcode::AssignGlobalVar => "DH_ASSIGNGLOBALVAR",
            Opcode::AddGlobalVar => "DH_ADDGLOBALVAR",
            Opcode::SubGlobalVar => "DH_SUBGLOBALVAR",
            Opcode::MulGlobalVar => "DH_MULGLOBALVAR",
            Opcode::DivGlobalVar => "DH_DIVGLOBALVAR",
            Opcode::ModGlobalVar => "DH_MODGLOBALVAR",
            Opcode::IncLocalVar => "DH_INCLOCALVAR",
            Opcode::DecLocalVar => "DH_DECLOCALVAR",
            Opcode::AssignLocalVar => "DH_ASSIGNLOCALVAR",
            Opcode::AddLocalVar => "DH_ADDLOCALVAR",
            Opcode::SubLocalVar => "DH_SUBLOCALVAR",
            Opcode::MulLocalVar => "DH_MULLOCALVAR",
            Opcode::DivLocalVar => "DH_DIVLOCALVAR",
            Opcode::ModLocalVar => "DH_MODLOCALVAR",
            Opcode::CaseGoto => "DH_CASEGOTO",
            Opcode::Drop => "DH_DROP",
            Opcode::IncGlobalArray => "DH_INCGLOBALARRAY",
            Opcode::DecGlobalArray => "DH_DECGLOBALARRAY",
            Opcode::AssignGlobalArray => "DH_ASSIGNGLOBALARRAY",
            Opcode::AddGlobalArray => "DH_ADDGLOBALARRAY",
            Opcode::SubGlobalArray => "DH_SUBGLOBALARRAY",
            Opcode::MulGlobalArray => "DH_MULGLOBALARRAY",
            Opcode::DivGlobalArray => "DH_DIVGLOBALARRAY",
            Opcode::ModGlobalArray => "DH_MODGLOBALARRAY",
            Opcode::PushGlobalArray => "DH_PUSHGLOBALARRAY",
            Opcode::Swap => "DH_SWAP",
            Opcode::Dup => "DH_DUP",
            Opcode::ArraySet => "DH_ARRAYSET",
        }
    }
}

/// Return kind of a builtin bot command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReturnKind {
    Void,
    Int,
    Bool,
    Str,
}

/// Signature of a builtin bot command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotCommandInfo {
    pub name: &'static str,
    pub num_args: usize,
    pub num_string_args: usize,
    pub ret: ReturnKind,
}

const fn cmd(
    name: &'static str,
    num_args: usize,
    num_string_args: usize,
    ret: ReturnKind,
) -> BotCommandInfo {
    BotCommandInfo {
        name,
        num_args,
        num_string_args,
        ret,
    }
}

/// All builtin bot commands, indexed by the wire ordinal carried by
/// `DH_COMMAND` records.
pub static BOT_COMMANDS: [BotCommandInfo; NUM_BOT_COMMANDS as usize] = [
    cmd("changestate", 1, 0, ReturnKind::Void),
    cmd("delay", 1, 0, ReturnKind::Void),
    cmd("Random", 2, 0, ReturnKind::Int),
    cmd("StringsAreEqual", 0, 2, ReturnKind::Bool),
    cmd("LookForPowerups", 2, 0, ReturnKind::Int),
    cmd("LookForWeapons", 2, 0, ReturnKind::Int),
    cmd("LookForAmmo", 2, 0, ReturnKind::Int),
    cmd("LookForBaseHealth", 2, 0, ReturnKind::Int),
    cmd("LookForBaseArmor", 2, 0, ReturnKind::Int),
    cmd("LookForSuperHealth", 2, 0, ReturnKind::Int),
    cmd("LookForSuperArmor", 2, 0, ReturnKind::Int),
    cmd("LookForPlayerEnemies", 1, 0, ReturnKind::Int),
    cmd("GetClosestPlayerEnemy", 0, 0, ReturnKind::Int),
    cmd("MoveLeft", 1, 0, ReturnKind::Void),
    cmd("MoveRight", 1, 0, ReturnKind::Void),
    cmd("MoveForward", 1, 0, ReturnKind::Void),
    cmd("MoveBackwards", 1, 0, ReturnKind::Void),
    cmd("StopMovement", 0, 0, ReturnKind::Void),
    cmd("StopForwardMovement", 0, 0, ReturnKind::Void),
    cmd("StopSidewaysMovement", 0, 0, ReturnKind::Void),
    cmd("CheckTerrain", 2, 0, ReturnKind::Int),
    cmd("PathToGoal", 1, 0, ReturnKind::Int),
    cmd("PathToLastKnownEnemyPosition", 1, 0, ReturnKind::Int),
    cmd("PathToLastHeardSound", 1, 0, ReturnKind::Int),
    cmd("Roam", 1, 0, ReturnKind::Int),
    cmd("GetPathingCostToItem", 1, 0, ReturnKind::Int),
    cmd("GetDistanceToItem", 1, 0, ReturnKind::Int),
    cmd("GetItemName", 1, 0, ReturnKind::Str),
    cmd("IsItemVisible", 1, 0, ReturnKind::Bool),
    cmd("SetGoal", 1, 0, ReturnKind::Void),
    cmd("BeginAimingAtEnemy", 0, 0, ReturnKind::Void),
    cmd("StopAimingAtEnemy", 0, 0, ReturnKind::Void),
    cmd("Turn", 1, 0, ReturnKind::Void),
    cmd("GetCurrentAngle", 0, 0, ReturnKind::Int),
    cmd("SetEnemy", 1, 0, ReturnKind::Void),
    cmd("ClearEnemy", 0, 0, ReturnKind::Void),
    cmd("IsEnemyAlive", 0, 0, ReturnKind::Bool),
    cmd("IsEnemyVisible", 0, 0, ReturnKind::Bool),
    cmd("GetDistanceToEnemy", 0, 0, ReturnKind::Int),
    cmd("GetPlayerDamagedBy", 0, 0, ReturnKind::Int),
    cmd("GetEnemyInvulnerabilityTicks", 0, 0, ReturnKind::Int),
    cmd("FireWeapon", 0, 0, ReturnKind::Void),
    cmd("BeginFiringWeapon", 0, 0, ReturnKind::Void),
    cmd("StopFiringWeapon", 0, 0, ReturnKind::Void),
    cmd("GetCurrentWeapon", 0, 0, ReturnKind::Str),
    cmd("ChangeWeapon", 0, 1, ReturnKind::Void),
    cmd("GetWeaponFromItem", 1, 0, ReturnKind::Str),
    cmd("IsWeaponOwned", 1, 0, ReturnKind::Bool),
    cmd("IsFavoriteWeapon", 0, 1, ReturnKind::Bool),
    cmd("Say", 0, 1, ReturnKind::Void),
    cmd("SayFromFile", 0, 2, ReturnKind::Void),
    cmd("SayFromChatFile", 0, 1, ReturnKind::Void),
    cmd("BeginChatting", 0, 0, ReturnKind::Void),
    cmd("StopChatting", 0, 0, ReturnKind::Void),
    cmd("ChatSectionExists", 0, 1, ReturnKind::Bool),
    cmd("ChatSectionExistsInFile", 0, 2, ReturnKind::Bool),
    cmd("GetLastChatString", 0, 0, ReturnKind::Str),
    cmd("GetLastChatPlayer", 0, 0, ReturnKind::Str),
    cmd("GetChatFrequency", 0, 0, ReturnKind::Int),
    cmd("Jump", 0, 0, ReturnKind::Void),
    cmd("BeginJumping", 0, 0, ReturnKind::Void),
    cmd("StopJumping", 0, 0, ReturnKind::Void),
    cmd("Taunt", 0, 0, ReturnKind::Void),
    cmd("Respawn", 0, 0, ReturnKind::Void),
    cmd("TryToJoinGame", 0, 0, ReturnKind::Void),
    cmd("IsDead", 0, 0, ReturnKind::Bool),
    cmd("IsSpectating", 0, 0, ReturnKind::Bool),
    cmd("GetHealth", 0, 0, ReturnKind::Int),
    cmd("GetArmor", 0, 0, ReturnKind::Int),
    cmd("GetBaseHealth", 0, 0, ReturnKind::Int),
    cmd("GetBaseArmor", 0, 0, ReturnKind::Int),
    cmd("GetBotskill", 0, 0, ReturnKind::Int),
    cmd("GetAccuracy", 0, 0, ReturnKind::Int),
    cmd("GetIntellect", 0, 0, ReturnKind::Int),
    cmd("GetAnticipation", 0, 0, ReturnKind::Int),
    cmd("GetEvade", 0, 0, ReturnKind::Int),
    cmd("GetReactionTime", 0, 0, ReturnKind::Int),
    cmd("GetPerception", 0, 0, ReturnKind::Int),
    cmd("SetSkillIncrease", 1, 0, ReturnKind::Void),
    cmd("IsSkillIncreased", 0, 0, ReturnKind::Bool),
    cmd("SetSkillDecrease", 1, 0, ReturnKind::Void),
    cmd("IsSkillDecreased", 0, 0, ReturnKind::Bool),
    cmd("GetGameMode", 0, 0, ReturnKind::Int),
    cmd("GetSpread", 0, 0, ReturnKind::Int),
    cmd("GetLastJoinedPlayer", 0, 0, ReturnKind::Str),
    cmd("GetPlayerName", 1, 0, ReturnKind::Str),
    cmd("GetReceivedMedal", 0, 0, ReturnKind::Int),
    cmd("ACS_Execute", 5, 0, ReturnKind::Void),
    cmd("GetFavoriteWeapon", 0, 0, ReturnKind::Str),
    cmd("SayFromLump", 0, 2, ReturnKind::Void),
    cmd("SayFromChatLump", 0, 1, ReturnKind::Void),
    cmd("ChatSectionExistsInLump", 0, 2, ReturnKind::Bool),
    cmd("ChatSectionExistsInChatLump", 0, 1, ReturnKind::Bool),
];

/// Bot event names used for `event "<name>"` titles, indexed by the event
/// type carried by `DH_EVENT` records.
pub static BOT_EVENTS: [&str; 65] = [
    "killed_byenemy",
    "killed_byplayer",
    "killed_byself",
    "killed_byenvironment",
    "reachedgoal",
    "goalremoved",
    "damagedby_player",
    "playersay",
    "enemykilled",
    "respawned",
    "intermission",
    "newmap",
    "enemy_usedfist",
    "enemy_usedchainsaw",
    "enemy_firedpistol",
    "enemy_firedshotgun",
    "enemy_firedssg",
    "enemy_firedchaingun",
    "enemy_firedminigun",
    "enemy_firedrocket",
    "enemy_firedgrenade",
    "enemy_firedrailgun",
    "enemy_firedplasma",
    "enemy_firedbfg",
    "enemy_firedbfg10k",
    "player_usedfist",
    "player_usedchainsaw",
    "player_firedpistol",
    "player_firedshotgun",
    "player_firedssg",
    "player_firedchaingun",
    "player_firedminigun",
    "player_firedrocket",
    "player_firedgrenade",
    "player_firedrailgun",
    "player_firedplasma",
    "player_firedbfg",
    "player_firedbfg10k",
    "usedfist",
    "usedchainsaw",
    "firedpistol",
    "firedshotgun",
    "firedssg",
    "firedchaingun",
    "firedminigun",
    "firedrocket",
    "firedgrenade",
    "firedrailgun",
    "firedplasma",
    "firedbfg",
    "firedbfg10k",
    "player_joinedgame",
    "joinedgame",
    "duel_startingcountdown",
    "duel_fight",
    "duel_winsequence",
    "spectating",
    "lms_startingcountdown",
    "lms_fight",
    "lms_winsequence",
    "weaponchange",
    "enemy_bfgexploded",
    "player_bfgexploded",
    "bfgexploded",
    "receivedmedal",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_ordinals_are_pinned() {
        assert_eq!(Opcode::from_index(0), Some(Opcode::Command));
        assert_eq!(Opcode::from_index(10), Some(Opcode::EndEvent));
        assert_eq!(Opcode::from_index(20), Some(Opcode::NotEquals));
        assert_eq!(Opcode::from_index(30), Some(Opcode::UnaryMinus));
        assert_eq!(Opcode::from_index(40), Some(Opcode::StringList));
        assert_eq!(Opcode::from_index(50), Some(Opcode::DecLocalVar));
        assert_eq!(Opcode::from_index(57), Some(Opcode::CaseGoto));
        assert_eq!(Opcode::from_index(60), Some(Opcode::DecGlobalArray));
        assert_eq!(Opcode::from_index(70), Some(Opcode::ArraySet));
        assert_eq!(Opcode::from_index(NUM_DATA_HEADERS), None);
        assert_eq!(Opcode::from_index(-1), None);
    }

    #[test]
    fn opcode_index_round_trips() {
        for (i, op) in OPCODES.iter().enumerate() {
            assert_eq!(op.index(), i as i32);
            assert_eq!(Opcode::from_index(i as i32), Some(*op));
        }
    }

    #[test]
    fn bot_command_ordinals_are_pinned() {
        assert_eq!(BOT_COMMANDS[0].name, "changestate");
        assert_eq!(BOT_COMMANDS[2].name, "Random");
        assert_eq!(BOT_COMMANDS[2].num_args, 2);
        assert_eq!(BOT_COMMANDS[2].ret, ReturnKind::Int);
        assert_eq!(BOT_COMMANDS[3].num_string_args, 2);
        assert_eq!(BOT_COMMANDS[10].name, "LookForSuperArmor");
        assert_eq!(BOT_COMMANDS[20].name, "CheckTerrain");
        assert_eq!(BOT_COMMANDS[24].name, "Roam");
        assert_eq!(BOT_COMMANDS[40].name, "GetEnemyInvulnerabilityTicks");
        assert_eq!(BOT_COMMANDS[66].name, "IsSpectating");
        assert_eq!(BOT_COMMANDS[87].name, "ACS_Execute");
        assert_eq!(BOT_COMMANDS[87].num_args, 5);
        assert_eq!(BOT_COMMANDS[92].name, "ChatSectionExistsInChatLump");
    }
}
