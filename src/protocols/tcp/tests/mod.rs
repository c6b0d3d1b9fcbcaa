// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Scenario tests driving the engine end to end through its public surface:
//! sockets on one side, scripted peer segments through `TcpPeer::receive` on
//! the other, with the background driver running for real.
